//! Invocation of the external format converter.
//!
//! The converter itself is an outside program (LyX by default). This module
//! only expands the configured argv templates for a document, runs them, and
//! checks that the expected output file appeared.

use tracing::{info, instrument};

use crate::config::{ConverterConfig, RICH_PLACEHOLDER, SOURCE_PLACEHOLDER};
use crate::errors::ConversionError;
use crate::models::Document;
use crate::runner::CommandRunner;

#[derive(Debug, Clone)]
pub struct Converter {
    config: ConverterConfig,
}

impl Converter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Regenerate the source form from the rich form.
    #[instrument(skip_all, fields(document = %doc.name))]
    pub async fn rich_to_text(
        &self,
        runner: &CommandRunner,
        doc: &Document,
    ) -> Result<(), ConversionError> {
        let argv = expand(&self.config.rich_to_text, doc);
        runner
            .run(&argv)
            .await
            .map_err(|source| ConversionError::ConverterFailed {
                path: doc.rich.clone(),
                source,
            })?;
        if !doc.source.exists() {
            return Err(ConversionError::MissingOutput(doc.source.clone()));
        }
        info!(source = %doc.source_file_name(), "exported source form");
        Ok(())
    }

    /// Synthesize the rich form from the source form.
    #[instrument(skip_all, fields(document = %doc.name))]
    pub async fn text_to_rich(
        &self,
        runner: &CommandRunner,
        doc: &Document,
    ) -> Result<(), ConversionError> {
        let argv = expand(&self.config.text_to_rich, doc);
        runner
            .run(&argv)
            .await
            .map_err(|source| ConversionError::ConverterFailed {
                path: doc.source.clone(),
                source,
            })?;
        if !doc.rich.exists() {
            return Err(ConversionError::MissingOutput(doc.rich.clone()));
        }
        info!(rich = %doc.rich_file_name(), "generated rich form");
        Ok(())
    }
}

fn expand(template: &[String], doc: &Document) -> Vec<String> {
    let source = doc.source.to_string_lossy();
    let rich = doc.rich.to_string_lossy();
    template
        .iter()
        .map(|arg| {
            arg.replace(SOURCE_PLACEHOLDER, &source)
                .replace(RICH_PLACEHOLDER, &rich)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::errors::CommandError;

    fn doc(dir: &Path) -> Document {
        Document {
            name: "intro".into(),
            source: dir.join("intro.tex"),
            rich: dir.join("intro.lyx"),
            is_entry_point: false,
        }
    }

    fn copy_converter() -> ConverterConfig {
        ConverterConfig {
            rich_to_text: vec!["cp".into(), "{rich}".into(), "{source}".into()],
            text_to_rich: vec!["cp".into(), "{source}".into(), "{rich}".into()],
        }
    }

    #[test]
    fn test_expand_substitutes_paths() {
        let d = doc(Path::new("/repo/tex"));
        let argv = expand(&ConverterConfig::default().rich_to_text, &d);
        assert_eq!(
            argv,
            vec![
                "lyx",
                "--export-to",
                "latex",
                "/repo/tex/intro.tex",
                "-f",
                "/repo/tex/intro.lyx"
            ]
        );
    }

    #[tokio::test]
    async fn test_round_trip_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path());
        fs::write(&d.source, "body\n").unwrap();

        let runner = CommandRunner::new(dir.path());
        let converter = Converter::new(copy_converter());
        converter.text_to_rich(&runner, &d).await.unwrap();
        converter.rich_to_text(&runner, &d).await.unwrap();
        converter.rich_to_text(&runner, &d).await.unwrap();

        assert_eq!(fs::read_to_string(&d.source).unwrap(), "body\n");
        assert_eq!(fs::read_to_string(&d.rich).unwrap(), "body\n");
    }

    #[tokio::test]
    async fn test_converter_failure_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path());
        let runner = CommandRunner::new(dir.path());
        let converter = Converter::new(copy_converter());

        let err = converter.text_to_rich(&runner, &d).await.unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConverterFailed {
                source: CommandError::Failed { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_output_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let d = doc(dir.path());
        let runner = CommandRunner::new(dir.path());
        let converter = Converter::new(ConverterConfig {
            rich_to_text: vec!["true".into(), "{rich}".into(), "{source}".into()],
            text_to_rich: vec!["true".into(), "{source}".into()],
        });

        let err = converter.text_to_rich(&runner, &d).await.unwrap_err();
        assert!(matches!(err, ConversionError::MissingOutput(_)));
    }
}
