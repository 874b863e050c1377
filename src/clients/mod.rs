mod user_service;

pub use user_service::friend_ids;
