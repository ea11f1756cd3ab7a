pub mod agenda;
pub mod committee;
pub mod contracts;
pub mod events;
pub mod metadata;
pub mod service;
pub mod settings;
pub mod source;

#[cfg(test)]
pub(crate) mod test_support;
