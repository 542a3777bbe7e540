//! Local command-line speech engines (espeak-ng, piper).

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{AudioFormat, SpeechProvider, SpeechRequest};
use crate::error::{ProviderError, ProviderResult};

const STDERR_TAIL_CHARS: usize = 2000;

/// How to invoke a local speech binary.
///
/// Arguments may contain `{voice}`, `{language}` and `{output}` placeholders.
/// The text itself is written to the process's stdin.
#[derive(Debug, Clone)]
pub struct CommandSpeechConfig {
    pub name: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Voice used when the request has none; `None` means the language tag
    pub default_voice: Option<String>,
}

impl CommandSpeechConfig {
    /// espeak-ng reading stdin and writing a WAV file.
    pub fn espeak(binary: impl Into<PathBuf>) -> Self {
        Self {
            name: "espeak".to_string(),
            program: binary.into(),
            args: ["-v", "{voice}", "-w", "{output}", "--stdin"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_voice: None,
        }
    }

    /// piper with a fixed voice model.
    pub fn piper(binary: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            name: "piper".to_string(),
            program: binary.into(),
            args: vec![
                "--model".to_string(),
                "{voice}".to_string(),
                "--output_file".to_string(),
                "{output}".to_string(),
            ],
            default_voice: Some(model),
        }
    }

    /// Substitute placeholders. Caller-supplied values must not look like
    /// options or paths; configured defaults are trusted.
    fn render_args(&self, request: &SpeechRequest, output: &str) -> ProviderResult<Vec<String>> {
        for (what, value) in [("voice", request.voice.as_deref()), ("language", Some(request.language.as_str()))] {
            if let Some(value) = value.filter(|v| !is_plain_argument(v)) {
                return Err(ProviderError::RequestFailed(format!("{} {:?} is not allowed", what, value)));
            }
        }

        let voice = request
            .voice
            .clone()
            .or_else(|| self.default_voice.clone())
            .unwrap_or_else(|| request.primary_language().to_string());

        Ok(self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", &voice)
                    .replace("{language}", &request.language)
                    .replace("{output}", output)
            })
            .collect())
    }
}

fn is_plain_argument(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('-')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-'))
}

/// Speech provider that shells out to a local engine.
pub struct CommandSpeechProvider {
    config: CommandSpeechConfig,
}

impl CommandSpeechProvider {
    pub fn new(config: CommandSpeechConfig) -> Self {
        Self { config }
    }

    /// Whether the configured binary can be found.
    pub fn is_available(&self) -> bool {
        which::which(&self.config.program).is_ok()
    }
}

#[async_trait]
impl SpeechProvider for CommandSpeechProvider {
    async fn synthesize(&self, request: &SpeechRequest) -> ProviderResult<Vec<u8>> {
        let program = which::which(&self.config.program).map_err(|_| {
            ProviderError::Unavailable(format!("{} not found", self.config.program.display()))
        })?;

        let scratch = tempfile::Builder::new().prefix("speech-").tempdir()?;
        let output = scratch.path().join("speech.wav");
        let args = self.config.render_args(request, &output.to_string_lossy())?;

        debug!(provider = %self.config.name, ?args, "Running speech command");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .chars()
                .rev()
                .take(STDERR_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            return Err(ProviderError::CommandFailed {
                program: self.config.name.clone(),
                message: format!("exit status {}", result.status),
                stderr: Some(tail),
            });
        }

        let bytes = tokio::fs::read(&output).await.map_err(|e| ProviderError::CommandFailed {
            program: self.config.name.clone(),
            message: format!("no audio written: {}", e),
            stderr: None,
        })?;
        Ok(bytes)
    }

    fn audio_format(&self) -> AudioFormat {
        AudioFormat::Wav
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_espeak_args_default_to_language() {
        let config = CommandSpeechConfig::espeak("espeak-ng");
        let args = config
            .render_args(&SpeechRequest::new("Namaste.", "hi-IN"), "/tmp/out.wav")
            .unwrap();
        assert_eq!(args, ["-v", "hi", "-w", "/tmp/out.wav", "--stdin"]);
    }

    #[test]
    fn test_request_voice_overrides_default() {
        let config = CommandSpeechConfig::piper("piper", "en_US-amy.onnx");
        let args = config.render_args(&SpeechRequest::new("Hi.", "en"), "/o.wav").unwrap();
        assert_eq!(args[1], "en_US-amy.onnx");

        let request = SpeechRequest::new("Hi.", "en").with_voice(Some("custom.onnx".into()));
        assert_eq!(config.render_args(&request, "/o.wav").unwrap()[1], "custom.onnx");
    }

    #[test]
    fn test_option_like_voice_refused() {
        let config = CommandSpeechConfig::piper("/opt/piper", "/models/en_US-amy.onnx");
        for voice in ["--output_file=/etc/cron.d/x", "../models/other.onnx"] {
            let request = SpeechRequest::new("Hi.", "en").with_voice(Some(voice.into()));
            let err = config.render_args(&request, "/o.wav").unwrap_err();
            assert!(matches!(err, ProviderError::RequestFailed(_)), "{voice}");
        }

        // configured model paths are not caller input
        let args = config.render_args(&SpeechRequest::new("Hi.", "en"), "/o.wav").unwrap();
        assert_eq!(args[1], "/models/en_US-amy.onnx");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let provider = CommandSpeechProvider::new(CommandSpeechConfig::espeak("/nonexistent/espeak-ng"));
        assert!(!provider.is_available());
        let err = provider.synthesize(&SpeechRequest::new("Hi.", "en")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[cfg(unix)]
    fn fake_engine(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-tts");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        // copies stdin into the file named after -w
        let engine = fake_engine(dir.path(), r#"cat > "$4""#);
        let provider = CommandSpeechProvider::new(CommandSpeechConfig::espeak(engine));

        let bytes = provider
            .synthesize(&SpeechRequest::new("spoken words", "en"))
            .await
            .unwrap();
        assert_eq!(bytes, b"spoken words");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_engine_failure_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "cat >/dev/null; echo 'unknown voice' >&2; exit 3");
        let provider = CommandSpeechProvider::new(CommandSpeechConfig::espeak(engine));

        let err = provider.synthesize(&SpeechRequest::new("x", "xx")).await.unwrap_err();
        match err {
            ProviderError::CommandFailed { program, stderr, .. } => {
                assert_eq!(program, "espeak");
                assert!(stderr.unwrap().contains("unknown voice"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
