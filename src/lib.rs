pub mod account;
pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod logging;
pub mod mastery;
pub mod models;
pub mod recommend;
pub mod selection;
pub mod session;
pub mod state;
pub mod store;

pub use api::{HttpLearningApi, LearningApi};
pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use state::ClientState;
