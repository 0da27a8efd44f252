//! Data models shared across stores.

pub mod movement;
pub mod product;
pub mod reservation;

pub use movement::{
    DateInfo, MovementMetadata, MovementRecord, MovementType, NewMovement, Period,
};
pub use product::{Product, ProductProjection};
pub use reservation::CartReservation;
