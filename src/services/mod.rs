pub mod dispatcher;
pub mod health_service;
pub mod message_service;
pub mod stats_service;
