use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use resilience::ErrorClass;

/// Broker and client codes that clear up on their own (leader election,
/// coordinator moves, network drops, full local queue)
const TRANSIENT_CODES: &[RDKafkaErrorCode] = &[
    RDKafkaErrorCode::MessageTimedOut,
    RDKafkaErrorCode::QueueFull,
    RDKafkaErrorCode::RequestTimedOut,
    RDKafkaErrorCode::BrokerNotAvailable,
    RDKafkaErrorCode::LeaderNotAvailable,
    RDKafkaErrorCode::NotLeaderForPartition,
    RDKafkaErrorCode::NetworkException,
    RDKafkaErrorCode::AllBrokersDown,
    RDKafkaErrorCode::BrokerTransportFailure,
    RDKafkaErrorCode::OperationTimedOut,
    RDKafkaErrorCode::CoordinatorLoadInProgress,
    RDKafkaErrorCode::CoordinatorNotAvailable,
    RDKafkaErrorCode::NotCoordinator,
    RDKafkaErrorCode::NotEnoughReplicas,
    RDKafkaErrorCode::NotEnoughReplicasAfterAppend,
    RDKafkaErrorCode::RebalanceInProgress,
    RDKafkaErrorCode::ReplicaNotAvailable,
    RDKafkaErrorCode::Resolve,
    RDKafkaErrorCode::WaitingForCoordinator,
    RDKafkaErrorCode::PartitionEOF,
];

/// Map a client error onto the relay's error taxonomy
///
/// Anything without a recognised retryable code (authorization, unknown
/// topic, invalid configuration, oversized record) is fatal.
pub fn classify_kafka_error(err: &KafkaError) -> ErrorClass {
    match err {
        KafkaError::Canceled | KafkaError::NoMessageReceived => ErrorClass::Transient,
        _ => match err.rdkafka_error_code() {
            Some(code) if TRANSIENT_CODES.contains(&code) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
    }
}
