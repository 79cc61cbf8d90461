//! DynamoDB-backed record sink.
//!
//! Items are written with `PutItem`, which replaces any existing item with the
//! same primary key. The table is expected to use `id` as its hash key and
//! `timestamp` as its range key.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::operation::put_item::PutItemError;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use serde_dynamo::to_item;

use super::RecordSink;
use crate::error::SinkError;
use crate::types::{ItemKey, ProcessedItem};

/// Writes processed items to a DynamoDB table.
#[derive(Debug, Clone)]
pub struct DynamoDbSink {
    client: Client,
    table_name: String,
}

impl DynamoDbSink {
    /// Creates a sink from an existing DynamoDB client.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Creates a sink using credentials and region from the environment.
    pub async fn from_env(table_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(Client::new(&config), table_name)
    }

    /// Returns the target table name.
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

#[async_trait]
impl RecordSink for DynamoDbSink {
    async fn upsert(&self, key: &ItemKey, item: &ProcessedItem) -> Result<(), SinkError> {
        key.validate().map_err(|e| SinkError::permanent(e.to_string()))?;

        let attributes: HashMap<String, AttributeValue> =
            to_item(item).map_err(|e| SinkError::permanent(format!("item is not representable: {}", e)))?;

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(attributes))
            .send()
            .await
            .map(|_| ())
            .map_err(classify_put_item_error)
    }
}

/// Maps an SDK failure onto the transient/permanent split.
fn classify_put_item_error<R>(error: SdkError<PutItemError, R>) -> SinkError
where
    R: std::fmt::Debug,
{
    match &error {
        SdkError::TimeoutError(_) => SinkError::timeout(format!("{:?}", error)),
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            SinkError::unavailable(format!("{:?}", error))
        }
        SdkError::ServiceError(context) => {
            let service_error = context.err();
            classify_error_code(
                service_error.code().unwrap_or_default(),
                service_error.message().unwrap_or_default(),
            )
        }
        SdkError::ConstructionFailure(_) => SinkError::permanent(format!("{:?}", error)),
        _ => SinkError::unavailable(format!("{:?}", error)),
    }
}

/// Classifies a DynamoDB error code.
///
/// Throughput and conflict errors are transient. Validation, conditional check,
/// item size and access errors are permanent for the item.
pub(crate) fn classify_error_code(code: &str, message: &str) -> SinkError {
    let description = if message.is_empty() {
        code.to_string()
    } else {
        format!("{}: {}", code, message)
    };

    match code {
        "ProvisionedThroughputExceededException" | "RequestLimitExceeded" | "ThrottlingException" => {
            SinkError::throttled(description)
        }
        "InternalServerError"
        | "ServiceUnavailable"
        | "TransactionConflictException"
        | "ReplicatedWriteConflictException" => SinkError::unavailable(description),
        _ => SinkError::permanent(description),
    }
}
