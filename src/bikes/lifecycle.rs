use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    AppError, AppResult,
    appresult::is_unique_violation,
    cache::ListingCache,
    db::{Bike, Role, User},
    events::{Event, EventAction, EventSink},
    store::{NewBike, Store},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BikeDraft {
    pub name: String,
    pub bike_number: String,
    pub price_per_hour: f64,
}

/// What `GET /bikes` shows, depending on who asks.
#[derive(Debug, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Listing {
    Owner { bikes: Vec<Bike> },
    Renter { available_bikes: Vec<Bike>, rented_by_me: Vec<Bike> },
    Public { available_bikes: Vec<Bike> },
}

/// Add, rent, return and delete.
///
/// Each mutation is one conditional write in the store, then a cache
/// invalidation, then an event.
#[derive(Clone)]
pub struct Lifecycle {
    store: Store,
    cache: ListingCache,
    events: Arc<dyn EventSink>,
    require_verified_to_rent: bool,
}

impl Lifecycle {
    pub fn new(store: Store, cache: ListingCache, events: Arc<dyn EventSink>, require_verified_to_rent: bool) -> Self {
        Self {
            store,
            cache,
            events,
            require_verified_to_rent,
        }
    }

    pub async fn list(&self, viewer: Option<&User>) -> AppResult<Listing> {
        Ok(match viewer {
            Some(user) if user.role == Role::Owner => Listing::Owner {
                bikes: self.store.bikes_owned_by(user.id).await?,
            },
            Some(user) => Listing::Renter {
                available_bikes: self.available_bikes().await?,
                rented_by_me: self.store.bikes_rented_by(user.id).await?,
            },
            None => Listing::Public {
                available_bikes: self.available_bikes().await?,
            },
        })
    }

    /// The available listing, read through the cache.
    pub async fn available_bikes(&self) -> AppResult<Vec<Bike>> {
        if let Some(bikes) = self.cache.available().await {
            return Ok(bikes);
        }

        let bikes = self.store.available_bikes().await?;
        self.cache.store_available(&bikes).await;
        Ok(bikes)
    }

    /// Registers a bike. It stays unlisted until its ownership is verified.
    pub async fn add(&self, owner: &User, draft: BikeDraft) -> AppResult<Bike> {
        if owner.role != Role::Owner {
            return Err(AppError::forbidden("only owners can add bikes"));
        }

        let name = draft.name.trim();
        let bike_number = draft.bike_number.trim();
        if name.is_empty() || bike_number.is_empty() {
            return Err(AppError::validation("name and bikeNumber are required"));
        }
        if !draft.price_per_hour.is_finite() || draft.price_per_hour < 0.0 {
            return Err(AppError::validation("pricePerHour must be a non-negative number"));
        }

        let bike = self
            .store
            .create_bike(NewBike {
                owner_id: owner.id,
                name,
                bike_number,
                price_per_hour: draft.price_per_hour,
            })
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::conflict(format!("bike number {bike_number} is already registered"))
                } else {
                    err.into()
                }
            })?;

        info!(bike_id = %bike.id, owner_id = %owner.id, "bike added, awaiting verification");
        Ok(bike)
    }

    pub async fn rent(&self, renter: &User, bike_id: Uuid) -> AppResult<Bike> {
        if renter.role != Role::Renter {
            return Err(AppError::forbidden("only renters can rent bikes"));
        }
        if self.require_verified_to_rent && !renter.is_verified() {
            return Err(AppError::forbidden("verify your driver's license before renting"));
        }

        // a missing bike is NotFound, not Conflict
        self.find(bike_id).await?;
        let Some(bike) = self.store.try_rent(bike_id, renter.id).await? else {
            return Err(AppError::conflict("bike is not available"));
        };

        self.cache.invalidate_available().await;
        info!(bike_id = %bike.id, renter_id = %renter.id, "bike rented");
        self.events.emit(Event::new(
            EventAction::Rented,
            bike.id,
            Some(renter.id),
            format!("{} ({}) has been rented by {}.", bike.name, bike.bike_number, renter.username),
        ));
        Ok(bike)
    }

    pub async fn return_bike(&self, renter: &User, bike_id: Uuid) -> AppResult<Bike> {
        if renter.role != Role::Renter {
            return Err(AppError::forbidden("only renters can return bikes"));
        }
        if !renter.is_verified() {
            return Err(AppError::forbidden("verify your driver's license before returning a bike"));
        }

        let bike = self.find(bike_id).await?;
        if bike.rented_by != Some(renter.id) {
            return Err(AppError::forbidden("you are not renting this bike"));
        }
        let Some(bike) = self.store.try_return(bike_id, renter.id).await? else {
            return Err(AppError::conflict("bike could not be returned"));
        };

        self.cache.invalidate_available().await;
        info!(bike_id = %bike.id, renter_id = %renter.id, "bike returned");
        self.events.emit(Event::new(
            EventAction::Returned,
            bike.id,
            Some(renter.id),
            format!("{} ({}) has been returned by {}.", bike.name, bike.bike_number, renter.username),
        ));
        Ok(bike)
    }

    pub async fn delete(&self, owner: &User, bike_id: Uuid) -> AppResult<Bike> {
        if owner.role != Role::Owner {
            return Err(AppError::forbidden("only owners can delete bikes"));
        }

        let bike = self.find(bike_id).await?;
        if bike.owner_id != owner.id {
            return Err(AppError::forbidden("you do not own this bike"));
        }
        if !self.store.try_delete(bike_id, owner.id).await? {
            return Err(AppError::conflict("bike is currently rented"));
        }

        self.cache.invalidate_available().await;
        info!(bike_id = %bike.id, owner_id = %owner.id, "bike deleted");
        self.events.emit(Event::new(
            EventAction::Deleted,
            bike.id,
            Some(owner.id),
            format!("{} ({}) has been removed from the listing.", bike.name, bike.bike_number),
        ));
        Ok(bike)
    }

    async fn find(&self, bike_id: Uuid) -> AppResult<Bike> {
        self.store
            .bike(bike_id)
            .await?
            .ok_or_else(|| AppError::not_found("bike not found"))
    }
}
