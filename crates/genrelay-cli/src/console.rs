use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use genrelay_contracts::surface::{Artifact, ArtifactBody, RenderContent, ResponseSurface};
use genrelay_engine::download_artifact;

/// Terminal surface. Streamed renders only print the part of the text that
/// has not been printed yet.
pub struct ConsoleSurface<W: Write + Send> {
    out: W,
    printed: String,
    out_dir: Option<PathBuf>,
}

impl ConsoleSurface<io::Stdout> {
    pub fn stdout(out_dir: Option<PathBuf>) -> Self {
        Self::new(io::stdout(), out_dir)
    }
}

impl<W: Write + Send> ConsoleSurface<W> {
    pub fn new(out: W, out_dir: Option<PathBuf>) -> Self {
        Self {
            out,
            printed: String::new(),
            out_dir,
        }
    }

    /// Ends a partially printed reply.
    pub fn finish(&mut self) {
        if !self.printed.is_empty() {
            self.printed.clear();
            self.write("\n");
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, text: &str) {
        self.finish();
        self.write(&format!("{text}\n"));
    }

    fn write(&mut self, text: &str) {
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(err) = result {
            tracing::debug!(error = %err, "console write failed");
        }
    }

    fn save_text_file(&mut self, name: &str, content: &str) {
        let Some(dir) = self.out_dir.clone() else {
            self.line(content);
            return;
        };
        let path = dir.join(name);
        match fs::create_dir_all(&dir).and_then(|_| fs::write(&path, content)) {
            Ok(()) => self.line(&format!("Saved response to {}", path.display())),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to save response");
                self.line(content);
            }
        }
    }
}

impl<W: Write + Send> ResponseSurface for ConsoleSurface<W> {
    fn render(&mut self, content: RenderContent) {
        match content {
            RenderContent::Text(text) => {
                if let Some(rest) = text.strip_prefix(self.printed.as_str()) {
                    let rest = rest.to_string();
                    self.write(&rest);
                } else {
                    self.finish();
                    self.write(&text);
                }
                self.printed = text;
            }
            RenderContent::Placeholder(text) => self.line(&text),
        }
    }

    fn deliver(&mut self, artifact: Artifact) {
        match &artifact.body {
            ArtifactBody::Url { url } => {
                self.line(&format!("[{}] {url}", artifact.metadata.model_used));
                let Some(dir) = self.out_dir.clone() else {
                    return;
                };
                match download_artifact(url, &dir) {
                    Ok(path) => self.line(&format!("Saved to {}", path.display())),
                    Err(err) => self.line(&format!("Download failed: {err:#}")),
                }
            }
            ArtifactBody::TextFile { name, content } => self.save_text_file(name, content),
        }
    }

    fn notice(&mut self, message: &str) {
        self.line(message);
    }

    fn failure(&mut self, message: &str) {
        self.line(message);
    }
}

#[cfg(test)]
mod tests {
    use genrelay_contracts::surface::ArtifactMetadata;

    use super::*;

    fn output(surface: ConsoleSurface<Vec<u8>>) -> String {
        String::from_utf8(surface.into_inner()).unwrap()
    }

    #[test]
    fn streamed_renders_print_only_new_text() {
        let mut surface = ConsoleSurface::new(Vec::new(), None);
        surface.render(RenderContent::Text("Hello".to_string()));
        surface.render(RenderContent::Text("Hello, world".to_string()));
        surface.render(RenderContent::Text("Hello, world!".to_string()));
        surface.finish();
        assert_eq!(output(surface), "Hello, world!\n");
    }

    #[test]
    fn notices_start_on_a_fresh_line() {
        let mut surface = ConsoleSurface::new(Vec::new(), None);
        surface.render(RenderContent::Text("partial".to_string()));
        surface.notice("retrying");
        surface.render(RenderContent::Text("again".to_string()));
        surface.finish();
        assert_eq!(output(surface), "partial\nretrying\nagain\n");
    }

    #[test]
    fn text_files_are_saved_under_out_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut surface = ConsoleSurface::new(Vec::new(), Some(temp.path().to_path_buf()));
        surface.deliver(Artifact::text_file(
            "response-1.txt",
            "long reply",
            ArtifactMetadata::default(),
        ));
        assert_eq!(
            fs::read_to_string(temp.path().join("response-1.txt"))?,
            "long reply"
        );
        assert!(output(surface).starts_with("Saved response to "));
        Ok(())
    }

    #[test]
    fn url_artifacts_print_adapter_and_link() {
        let mut surface = ConsoleSurface::new(Vec::new(), None);
        surface.deliver(Artifact::url(
            "https://cdn.test/a.png",
            ArtifactMetadata {
                prompt_echo: "a fox".to_string(),
                model_used: "DallE-XL".to_string(),
            },
        ));
        assert_eq!(output(surface), "[DallE-XL] https://cdn.test/a.png\n");
    }
}
