use std::fmt;

use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};
use sqlx::{FromRow, Row, sqlite::SqliteRow};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Renter,
}

/// Document verification progress of a bike or a renter.
///
/// `is_verified` is derived from this value and never stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum VerificationState {
    Unverified,
    Pending,
    Verified,
    Rejected,
}

#[derive(Debug, thiserror::Error)]
#[error("cannot move verification from {from} to {to}")]
pub struct InvalidTransition {
    pub from: VerificationState,
    pub to: VerificationState,
}

impl VerificationState {
    pub fn is_verified(self) -> bool {
        self == VerificationState::Verified
    }

    pub fn as_str(self) -> &'static str {
        use VerificationState::*;
        match self {
            Unverified => "unverified",
            Pending => "pending",
            Verified => "verified",
            Rejected => "rejected",
        }
    }

    /// Whether a new document may be submitted from this state.
    pub fn accepts_documents(self) -> bool {
        !self.is_verified()
    }

    pub fn transition(self, to: VerificationState) -> Result<VerificationState, InvalidTransition> {
        use VerificationState::*;
        match (self, to) {
            (Unverified, Pending | Verified)
            | (Pending, Pending | Verified | Rejected)
            | (Rejected, Pending | Verified) => Ok(to),
            (from, to) => Err(InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for VerificationState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub verification_status: VerificationState,
    pub license_document: Option<String>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.verification_status.is_verified()
    }
}

impl Serialize for User {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut user = serializer.serialize_struct("User", 6)?;
        user.serialize_field("id", &self.id)?;
        user.serialize_field("username", &self.username)?;
        user.serialize_field("email", &self.email)?;
        user.serialize_field("role", &self.role)?;
        user.serialize_field("verificationStatus", &self.verification_status)?;
        user.serialize_field("isVerified", &self.is_verified())?;
        user.end()
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bike {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub bike_number: String,
    pub price_per_hour: f64,
    pub available: bool,
    pub rented_by: Option<Uuid>,
    pub verification_status: VerificationState,
    pub ownership_document: Option<String>,
}

impl Bike {
    pub fn is_verified(&self) -> bool {
        self.verification_status.is_verified()
    }
}

impl Serialize for Bike {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut bike = serializer.serialize_struct("Bike", 10)?;
        bike.serialize_field("id", &self.id)?;
        bike.serialize_field("ownerId", &self.owner_id)?;
        bike.serialize_field("name", &self.name)?;
        bike.serialize_field("bikeNumber", &self.bike_number)?;
        bike.serialize_field("pricePerHour", &self.price_per_hour)?;
        bike.serialize_field("available", &self.available)?;
        bike.serialize_field("rentedBy", &self.rented_by)?;
        bike.serialize_field("verificationStatus", &self.verification_status)?;
        bike.serialize_field("isVerified", &self.is_verified())?;
        bike.serialize_field("ownershipDocument", &self.ownership_document)?;
        bike.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub rental_id: Uuid,
    pub sender_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub receiver_id: Option<Uuid>,
    pub body: String,
    pub system: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ChatMessage {
    pub fn from_user(rental_id: Uuid, sender_id: Uuid, receiver_id: Option<Uuid>, body: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            rental_id,
            sender_id: Some(sender_id),
            receiver_id,
            body,
            system: false,
            created_at: now_truncated(),
        }
    }

    pub fn system(rental_id: Uuid, body: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            rental_id,
            sender_id: None,
            receiver_id: None,
            body,
            system: true,
            created_at: now_truncated(),
        }
    }
}

impl<'r> FromRow<'r, SqliteRow> for ChatMessage {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let created_at: i64 = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            rental_id: row.try_get("rental_id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            body: row.try_get("body")?,
            system: row.try_get("system")?,
            created_at: from_millis(created_at).map_err(|err| sqlx::Error::ColumnDecode {
                index: "created_at".to_owned(),
                source: Box::new(err),
            })?,
        })
    }
}

pub fn now_millis() -> i64 {
    to_millis(OffsetDateTime::now_utc())
}

/// Current time at the millisecond precision the store keeps.
pub fn now_truncated() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_millisecond(now.millisecond()).unwrap_or(now)
}

pub fn to_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use VerificationState::*;

    #[test]
    fn verification_transitions() {
        assert_eq!(Unverified.transition(Pending).unwrap(), Pending);
        assert_eq!(Unverified.transition(Verified).unwrap(), Verified);
        assert_eq!(Pending.transition(Verified).unwrap(), Verified);
        assert_eq!(Pending.transition(Rejected).unwrap(), Rejected);
        assert_eq!(Rejected.transition(Pending).unwrap(), Pending);

        assert!(Unverified.transition(Rejected).is_err());
        assert!(Verified.transition(Pending).is_err());
        assert!(Verified.transition(Verified).is_err());
        assert!(Pending.transition(Unverified).is_err());
    }

    #[test]
    fn only_verified_counts_as_verified() {
        assert!(Verified.is_verified());
        for state in [Unverified, Pending, Rejected] {
            assert!(!state.is_verified());
            assert!(state.accepts_documents());
        }
    }

    #[test]
    fn bike_json_carries_derived_flag() {
        let bike = Bike {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "R15".to_owned(),
            bike_number: "MH12".to_owned(),
            price_per_hour: 50.0,
            available: true,
            rented_by: None,
            verification_status: Verified,
            ownership_document: None,
        };

        let json = serde_json::to_value(&bike).unwrap();
        assert_eq!(json["isVerified"], true);
        assert_eq!(json["verificationStatus"], "verified");

        let back: Bike = serde_json::from_value(json).unwrap();
        assert_eq!(back, bike);
    }

    #[test]
    fn millis_survive_conversion() {
        let now = now_millis();
        assert_eq!(to_millis(from_millis(now).unwrap()), now);
    }
}
