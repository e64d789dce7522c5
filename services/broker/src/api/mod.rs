//! Broker HTTP API module.
//!
//! # Purpose
//! Exposes route handler modules and the shared request-parsing helpers.
pub mod channels;
pub mod error;
pub mod events;
pub mod openapi;
pub mod queues;
pub mod stream;
pub mod system;
pub mod types;

use crate::api::error::{ApiError, api_validation_error};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use kairo_broker::BrokerError;
use kairo_common::ids::ChannelId;

/// Unwraps a JSON body, turning any extractor rejection into a 400.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => Err(api_validation_error(&rejection.body_text())),
    }
}

/// Channel ids that do not parse cannot name a live channel.
pub(crate) fn parse_channel_id(raw: &str) -> Result<ChannelId, ApiError> {
    raw.parse::<ChannelId>()
        .map_err(|_| ApiError::from(BrokerError::ChannelNotFound(raw.to_string())))
}
