//! Lambda entry point: processes Kinesis sensor batches into DynamoDB.

use std::sync::Arc;

use aws_lambda_events::event::kinesis::KinesisEvent;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use stream_batch_processor::config::ProcessorConfig;
use stream_batch_processor::dead_letter::LoggingDeadLetter;
use stream_batch_processor::lambda::{function_handler, KinesisBatchHandler};
use stream_batch_processor::logging::init_tracing;
use stream_batch_processor::processor::BatchProcessor;
use stream_batch_processor::sink::DynamoDbSink;
use stream_batch_processor::transform::SensorTransform;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ProcessorConfig::from_env()?;
    init_tracing(config.log_format);

    let sink = DynamoDbSink::from_env(config.sink_name.clone()).await;
    tracing::info!(table = sink.table_name(), "Processor starting");

    let processor = BatchProcessor::from_config(
        SensorTransform,
        Arc::new(sink),
        Some(Arc::new(LoggingDeadLetter)),
        &config,
    );
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    run(service_fn(|event: LambdaEvent<KinesisEvent>| {
        let handler = handler.clone();
        async move { function_handler(&handler, event).await }
    }))
    .await
}
