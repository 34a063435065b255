//! Bidirectional conversion between the Chat Completions and Responses
//! shapes.
//!
//! The two models describe the same conversations differently: chat attaches
//! tool calls to assistant messages, Responses promotes each call to its own
//! item. The conversions here are lossless for the common subset (text, tool
//! calls, refusals, usage, finish reasons). Responses-specific items with no
//! chat counterpart (web search, code interpreter, image generation, …) are
//! dropped with a debug log when projecting to chat; this is a one-way
//! conversion, not a silent equivalence.

mod messages;
mod request;
mod response;
mod stream;

pub use messages::{chat_messages_to_responses_items, responses_items_to_chat_messages};
