pub mod ollama;
pub mod provider;

#[cfg(test)]
pub mod testing;

pub use ollama::OllamaProvider;
pub use provider::ModelProvider;
