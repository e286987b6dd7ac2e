use thiserror::Error;

use crate::libs::storage::storage_traits::StoreError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Validation Error: {0}")]
    Validation(String),
    #[error("Store Error: {0}")]
    Store(#[from] StoreError),
    #[error("Subscription Error: {0}")]
    Subscription(String),
    #[error("Conversation is closed")]
    ConversationClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_their_cause() {
        let err = ChatError::from(StoreError::Unavailable("offline".to_string()));
        assert!(matches!(err, ChatError::Store(StoreError::Unavailable(_))));
        assert!(err.to_string().contains("offline"));
    }
}
