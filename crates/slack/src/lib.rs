//! Slack adapter for SquadUp.
//!
//! - **Socket Mode** (`socket`) - websocket event loop with reconnection
//! - **Commands** (`commands`) - `/match` and `!match` argument parsing
//! - **Events** (`events`) - envelope types and the dispatcher that feeds the coordinator
//! - **Block Kit** (`blocks`) - conversion of rendered requests and replies
//! - **Web API** (`web`) - `Messenger` implementation over `chat.*`, `reactions.*`, `users.info`
//!
//! # Setup
//!
//! 1. Create a Slack app with Socket Mode enabled.
//! 2. Subscribe to `message.channels`, `reaction_added` and `reaction_removed`.
//! 3. Register the `/match` slash command.
//! 4. Set `SQUADUP_SLACK_APP_TOKEN` and `SQUADUP_SLACK_BOT_TOKEN`.
//!
//! ```text
//! Socket Mode → EventDispatcher → MatchCoordinator → RosterStore
//!                                        ↓
//!                        SlackWebClient (chat.update, reactions.*)
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod socket;
pub mod web;
