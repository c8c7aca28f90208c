pub mod dispatcher;
pub mod entities;
pub mod gateway;
