mod handler;
mod model;

pub use handler::{friends_geo, nearby_users, read_users_geo, update_user_geo};
pub use model::{GeoUpdate, NearbyPosition, UserPosition, ensure_schema, friends_positions};
