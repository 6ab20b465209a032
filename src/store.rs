use sqlx::{FromRow, Row, Sqlite, SqliteExecutor, SqlitePool, Transaction, sqlite::SqlitePoolOptions};
use uuid::Uuid;

use crate::db::{Bike, ChatMessage, Role, User, VerificationState, to_millis};

const BIKE_COLUMNS: &str = "id,owner_id,name,bike_number,price_per_hour,available,rented_by,verification_status,ownership_document";
const USER_COLUMNS: &str = "id,username,email,password_hash,role,verification_status,license_document";

/// Record store for users, bikes and chat messages.
#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
}

pub struct NewBike<'a> {
    pub owner_id: Uuid,
    pub name: &'a str,
    pub bike_number: &'a str,
    pub price_per_hour: f64,
}

impl Store {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(url)
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    /// Private single-connection database, used by tests and tooling.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        sqlx::migrate!().run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    pub async fn create_user(&self, new: NewUser<'_>) -> Result<User, sqlx::Error> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO users (id,username,email,password_hash,role) VALUES (?,?,?,?,?)")
            .bind(id)
            .bind(new.username)
            .bind(new.email)
            .bind(new.password_hash)
            .bind(new.role)
            .execute(&self.pool)
            .await?;

        Ok(User {
            id,
            username: new.username.to_owned(),
            email: new.email.to_owned(),
            password_hash: new.password_hash.to_owned(),
            role: new.role,
            verification_status: VerificationState::Unverified,
            license_document: None,
        })
    }

    pub async fn user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id=?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn user_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email=?"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    /// Writes a verification decision if the user is still in `from`.
    pub async fn record_user_verification(
        &self,
        id: Uuid,
        from: VerificationState,
        to: VerificationState,
        document: &str,
    ) -> Result<bool, sqlx::Error> {
        Self::set_user_verification(&self.pool, id, from, to, document).await
    }

    /// `record_user_verification` on any executor, e.g. an open transaction.
    pub async fn set_user_verification<'e>(
        executor: impl SqliteExecutor<'e>,
        id: Uuid,
        from: VerificationState,
        to: VerificationState,
        document: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET verification_status=?, license_document=? WHERE id=? AND verification_status=?",
        )
        .bind(to)
        .bind(document)
        .bind(id)
        .bind(from)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn create_bike(&self, new: NewBike<'_>) -> Result<Bike, sqlx::Error> {
        let id = Uuid::now_v7();
        sqlx::query("INSERT INTO bikes (id,owner_id,name,bike_number,price_per_hour) VALUES (?,?,?,?,?)")
            .bind(id)
            .bind(new.owner_id)
            .bind(new.name)
            .bind(new.bike_number)
            .bind(new.price_per_hour)
            .execute(&self.pool)
            .await?;

        Ok(Bike {
            id,
            owner_id: new.owner_id,
            name: new.name.to_owned(),
            bike_number: new.bike_number.to_owned(),
            price_per_hour: new.price_per_hour,
            available: false,
            rented_by: None,
            verification_status: VerificationState::Unverified,
            ownership_document: None,
        })
    }

    pub async fn bike(&self, id: Uuid) -> Result<Option<Bike>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {BIKE_COLUMNS} FROM bikes WHERE id=?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn bikes_owned_by(&self, owner_id: Uuid) -> Result<Vec<Bike>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {BIKE_COLUMNS} FROM bikes WHERE owner_id=? ORDER BY rowid"))
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn bikes_rented_by(&self, renter_id: Uuid) -> Result<Vec<Bike>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {BIKE_COLUMNS} FROM bikes WHERE rented_by=? ORDER BY rowid"))
            .bind(renter_id)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn available_bikes(&self) -> Result<Vec<Bike>, sqlx::Error> {
        sqlx::query_as(&format!("SELECT {BIKE_COLUMNS} FROM bikes WHERE available=1 ORDER BY rowid"))
            .fetch_all(&self.pool)
            .await
    }

    /// Writes a verification decision if the bike is still in `from`.
    /// A verified bike becomes available in the same statement.
    pub async fn record_bike_verification(
        &self,
        id: Uuid,
        from: VerificationState,
        to: VerificationState,
        document: &str,
    ) -> Result<bool, sqlx::Error> {
        Self::set_bike_verification(&self.pool, id, from, to, document).await
    }

    /// `record_bike_verification` on any executor, e.g. an open transaction.
    pub async fn set_bike_verification<'e>(
        executor: impl SqliteExecutor<'e>,
        id: Uuid,
        from: VerificationState,
        to: VerificationState,
        document: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE bikes SET verification_status=?, ownership_document=?, \
             available = CASE WHEN ? = 'verified' AND rented_by IS NULL THEN 1 ELSE 0 END \
             WHERE id=? AND verification_status=?",
        )
        .bind(to)
        .bind(document)
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Hands an available bike to `renter_id` and returns the rented row.
    /// `None` if it was not available.
    pub async fn try_rent(&self, id: Uuid, renter_id: Uuid) -> Result<Option<Bike>, sqlx::Error> {
        sqlx::query_as(&format!(
            "UPDATE bikes SET available=0, rented_by=? WHERE id=? AND available=1 AND rented_by IS NULL \
             RETURNING {BIKE_COLUMNS}"
        ))
        .bind(renter_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Puts a bike back on the market and returns the listed row.
    /// `None` unless `renter_id` holds it.
    pub async fn try_return(&self, id: Uuid, renter_id: Uuid) -> Result<Option<Bike>, sqlx::Error> {
        sqlx::query_as(&format!(
            "UPDATE bikes SET available=1, rented_by=NULL \
             WHERE id=? AND rented_by=? AND available=0 AND verification_status='verified' \
             RETURNING {BIKE_COLUMNS}"
        ))
        .bind(id)
        .bind(renter_id)
        .fetch_optional(&self.pool)
        .await
    }

    /// Deletes a bike owned by `owner_id` that nobody holds.
    pub async fn try_delete(&self, id: Uuid, owner_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bikes WHERE id=? AND owner_id=? AND rented_by IS NULL")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn insert_chat_message(&self, message: &ChatMessage) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO chat_messages (id,rental_id,sender_id,receiver_id,body,system,created_at) VALUES (?,?,?,?,?,?,?)",
        )
        .bind(message.id)
        .bind(message.rental_id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.body)
        .bind(message.system)
        .bind(to_millis(message.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Messages of a rental in creation order, each with its sender's username.
    pub async fn chat_history(&self, rental_id: Uuid) -> Result<Vec<(ChatMessage, Option<String>)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT m.id,m.rental_id,m.sender_id,m.receiver_id,m.body,m.system,m.created_at,u.username AS sender_name \
             FROM chat_messages m LEFT JOIN users u ON u.id = m.sender_id \
             WHERE m.rental_id=? ORDER BY m.created_at ASC, m.rowid ASC",
        )
        .bind(rental_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((ChatMessage::from_row(row)?, row.try_get("sender_name")?)))
            .collect()
    }
}
