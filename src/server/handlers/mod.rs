pub mod answer;
pub mod conversations;
pub mod health;
pub mod search;
pub mod speech;
pub mod transcripts;
