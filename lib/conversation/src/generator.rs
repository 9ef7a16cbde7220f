//! Response generation seam.
//!
//! The conversation engine treats the language model as an opaque
//! capability: given the new input and the ordered history, produce a
//! response, optionally as a sequence of text fragments.

use crate::error::GeneratorError;
use crate::message::Message;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

/// A stream of response fragments.
pub type FragmentStream = BoxStream<'static, Result<String, GeneratorError>>;

/// Trait for response generators.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generates a complete response.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    async fn generate(&self, input: &str, history: &[Message]) -> Result<String, GeneratorError>;

    /// Generates a response as incremental fragments.
    ///
    /// The default implementation yields the whole response as one fragment.
    async fn generate_stream(
        &self,
        input: &str,
        history: &[Message],
    ) -> Result<FragmentStream, GeneratorError> {
        let response = self.generate(input, history).await?;
        Ok(stream::once(async move { Ok::<_, GeneratorError>(response) }).boxed())
    }
}

/// A generator that repeats the input back (for development and tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoGenerator;

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, input: &str, _history: &[Message]) -> Result<String, GeneratorError> {
        Ok(format!("You said: {input}"))
    }

    async fn generate_stream(
        &self,
        input: &str,
        _history: &[Message],
    ) -> Result<FragmentStream, GeneratorError> {
        let fragments: Vec<Result<String, GeneratorError>> =
            std::iter::once("You said:".to_string())
                .chain(input.split_whitespace().map(|word| format!(" {word}")))
                .map(Ok)
                .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

/// Drains a fragment stream into the full response text.
///
/// # Errors
///
/// Returns the first error produced by the stream.
pub async fn collect_fragments(mut fragments: FragmentStream) -> Result<String, GeneratorError> {
    let mut output = String::new();
    while let Some(fragment) = fragments.next().await {
        output.push_str(&fragment?);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Generator relying on the default streaming implementation.
    struct FixedGenerator;

    #[async_trait]
    impl ResponseGenerator for FixedGenerator {
        async fn generate(
            &self,
            _input: &str,
            _history: &[Message],
        ) -> Result<String, GeneratorError> {
            Ok("fixed".to_string())
        }
    }

    #[tokio::test]
    async fn default_stream_yields_single_fragment() {
        let fragments: Vec<_> = FixedGenerator
            .generate_stream("q", &[])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(fragments, vec![Ok("fixed".to_string())]);
    }

    #[tokio::test]
    async fn echo_stream_matches_echo_generate() {
        let whole = EchoGenerator.generate("how are you", &[]).await.unwrap();
        let stream = EchoGenerator
            .generate_stream("how are you", &[])
            .await
            .unwrap();
        let streamed = collect_fragments(stream).await.unwrap();
        assert_eq!(whole, streamed);
    }

    #[tokio::test]
    async fn collect_stops_at_first_error() {
        let fragments: FragmentStream = stream::iter(vec![
            Ok("a".to_string()),
            Err(GeneratorError::Timeout),
            Ok("b".to_string()),
        ])
        .boxed();
        assert_eq!(collect_fragments(fragments).await, Err(GeneratorError::Timeout));
    }
}
