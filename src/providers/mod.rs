/*!
 * Language model providers.
 *
 * - Chat: OpenAI-compatible chat completions (OpenRouter, OpenAI, local
 *   servers exposing the same API), used for translation, punctuation
 *   restoration and outlines
 */

pub mod chat;

pub use chat::{ChatClient, ChatEnhancer};
