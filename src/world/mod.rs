pub mod avatar;
pub mod players;
