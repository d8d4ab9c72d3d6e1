#![forbid(unsafe_code)]

pub mod app_services;
pub mod catalog_service;
pub mod config;
pub mod error;
pub mod locks;
pub mod progression_service;
pub mod user_service;

pub use course_core::Clock;

pub use app_services::AppServices;
pub use catalog_service::{CatalogService, NewVideo, VideoRemoval, VideoUpdate};
pub use config::EngineConfig;
pub use error::{AppServicesError, CatalogError, ErrorKind, ProgressionError, UserServiceError};
pub use locks::UserLocks;
pub use progression_service::ProgressionService;
pub use user_service::{AdminBootstrap, UserService};
