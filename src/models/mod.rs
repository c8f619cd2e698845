pub mod card;
pub mod config;
pub mod recognition;
pub mod roi;
pub mod site_profile;
pub mod table_state;
