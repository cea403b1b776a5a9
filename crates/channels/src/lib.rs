pub mod relay;

#[cfg(feature = "telegram")]
pub mod telegram;

pub use relay::{match_code, DisabledRelay, VerificationRelay, CODE_PATTERN};

#[cfg(feature = "telegram")]
pub use telegram::{BotApi, HttpBotApi, TelegramRelay};
