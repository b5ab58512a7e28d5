pub const MESSAGES_PROCESSED: &str = "card_consumer_messages_processed";
pub const MESSAGES_SUCCEEDED: &str = "card_consumer_messages_succeeded";
pub const MESSAGES_FAILED: &str = "card_consumer_messages_failed";
pub const MESSAGES_SKIPPED: &str = "card_consumer_messages_skipped";
pub const MESSAGES_DROPPED: &str = "card_consumer_messages_dropped";
pub const MESSAGE_LATENCY: &str = "card_consumer_message_ms";

pub const READ_ERRORS: &str = "card_consumer_read_errors";
pub const ACK_ERRORS: &str = "card_consumer_ack_errors";
pub const BATCH_SIZE: &str = "card_consumer_batch_size";
pub const PENDING_CLAIMED: &str = "card_consumer_pending_claimed";
