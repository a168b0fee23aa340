pub mod challenges;
pub mod settings;
