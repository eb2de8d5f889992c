use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::models::MessageId;
use crate::providers::{ChatBackend, ChatRequest, StreamEvent};
use crate::services::compose::OutboundMessage;
use crate::services::compress;

/// Progress of one reply, reported back to the app as it happens.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamResult {
    /// The backend accepted the turn; an empty assistant message should appear.
    Started {
        chat_id: String,
        message_id: MessageId,
    },
    /// Whole reply so far, not just the newest chunk.
    Progress {
        chat_id: String,
        message_id: MessageId,
        accumulated: String,
    },
    Done {
        chat_id: String,
        message_id: MessageId,
        full_content: String,
    },
    /// Failed before or during the reply. Any partial content stays as it is.
    Failed { chat_id: String, error: String },
    Cancelled { chat_id: String },
}

/// Post one turn and drive its reply to completion.
///
/// Image attachments are recompressed first. `on_event` sees `Started` at
/// most once and before any `Progress`, and exactly one terminal event.
pub async fn send_turn<F>(
    backend: Arc<dyn ChatBackend>,
    access_token: String,
    chat_id: String,
    outbound: OutboundMessage,
    cancel_token: CancellationToken,
    on_event: F,
) where
    F: FnMut(StreamResult) + Send,
{
    let file = match outbound.attachment {
        Some(original) => Some(compress::prepare_upload(original).await),
        None => None,
    };

    let request = ChatRequest {
        access_token,
        chat_id,
        message: Some(outbound.final_text).filter(|t| !t.is_empty()),
        file,
    };

    run_streaming(backend, request, cancel_token, on_event).await;
}

pub async fn run_streaming<F>(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    cancel_token: CancellationToken,
    mut on_event: F,
) where
    F: FnMut(StreamResult) + Send,
{
    let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);
    let chat_id = request.chat_id.clone();

    let stream_handle = tokio::spawn(async move {
        if let Err(e) = backend.stream_chat(request, tx.clone()).await {
            tracing::warn!("Chat request failed: {}", e);
            let _ = tx.send(StreamEvent::Error(e.user_message())).await;
        }
    });

    let mut message_id: Option<MessageId> = None;
    let mut accumulated = String::new();

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                stream_handle.abort();
                tracing::debug!("Reply for chat {} cancelled", chat_id);
                on_event(StreamResult::Cancelled { chat_id });
                return;
            }
            event = rx.recv() => {
                match event {
                    Some(StreamEvent::Opened) => {
                        if message_id.is_none() {
                            let id = MessageId::pending();
                            message_id = Some(id.clone());
                            on_event(StreamResult::Started {
                                chat_id: chat_id.clone(),
                                message_id: id,
                            });
                        }
                    }
                    Some(StreamEvent::Chunk(chunk)) => {
                        let id = match &message_id {
                            Some(id) => id.clone(),
                            None => {
                                let id = MessageId::pending();
                                message_id = Some(id.clone());
                                on_event(StreamResult::Started {
                                    chat_id: chat_id.clone(),
                                    message_id: id.clone(),
                                });
                                id
                            }
                        };
                        accumulated.push_str(&chunk);
                        on_event(StreamResult::Progress {
                            chat_id: chat_id.clone(),
                            message_id: id,
                            accumulated: accumulated.clone(),
                        });
                    }
                    Some(StreamEvent::Done) => {
                        match message_id {
                            Some(message_id) => on_event(StreamResult::Done {
                                chat_id,
                                message_id,
                                full_content: accumulated,
                            }),
                            None => on_event(StreamResult::Failed {
                                chat_id,
                                error: "Connection failed".to_string(),
                            }),
                        }
                        return;
                    }
                    Some(StreamEvent::Error(error)) => {
                        on_event(StreamResult::Failed { chat_id, error });
                        return;
                    }
                    None => {
                        let result = match message_id {
                            Some(message_id) => StreamResult::Done {
                                chat_id,
                                message_id,
                                full_content: accumulated,
                            },
                            None => StreamResult::Failed {
                                chat_id,
                                error: "Connection failed".to_string(),
                            },
                        };
                        on_event(result);
                        return;
                    }
                }
            }
        }
    }
}
