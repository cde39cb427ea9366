use std::{
    io,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use nbopen_notebook::{Dialect, Notebook};
use tempfile::TempDir;
use url::Url;

use crate::{Error, FetchDescriptor, SourceKind};

/// A notebook written to the local filesystem. A temporary notebook owns its
/// directory; dropping the value removes it, whichever way the invocation
/// ends.
#[derive(Debug)]
pub struct MaterializedNotebook {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl MaterializedNotebook {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.dir.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct MaterializerOptions {
    pub max_body_bytes: usize,
}

impl Default for MaterializerOptions {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Fetches a descriptor's content and writes it out as a notebook document.
/// The HTTP client is constructed by the caller and scoped to a single
/// invocation; timeouts are the client's.
pub struct Materializer {
    client: reqwest::Client,
    options: MaterializerOptions,
}

impl Materializer {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_options(client, MaterializerOptions::default())
    }

    pub fn with_options(client: reqwest::Client, options: MaterializerOptions) -> Self {
        Self { client, options }
    }

    /// Materialize into a fresh scoped temporary directory.
    pub async fn materialize(
        &self,
        descriptor: &FetchDescriptor,
    ) -> Result<MaterializedNotebook, Error> {
        let dir = tempfile::Builder::new().prefix("nbopen-").tempdir()?;
        let path = self.write_notebook(descriptor, dir.path()).await?;
        Ok(MaterializedNotebook {
            path,
            dir: Some(dir),
        })
    }

    /// Materialize into an explicit directory; the file is kept.
    pub async fn materialize_into(
        &self,
        descriptor: &FetchDescriptor,
        dir: &Path,
    ) -> Result<MaterializedNotebook, Error> {
        tokio::fs::create_dir_all(dir).await?;
        let path = self.write_notebook(descriptor, dir).await?;
        Ok(MaterializedNotebook { path, dir: None })
    }

    async fn write_notebook(
        &self,
        descriptor: &FetchDescriptor,
        dir: &Path,
    ) -> Result<PathBuf, Error> {
        let body = self.fetch(&descriptor.retrieval_url).await?;
        let name = descriptor.suggested_filename.as_str();

        let (file_name, contents) = match descriptor.source_kind {
            SourceKind::NotebookJson => {
                Notebook::parse(&body).map_err(|source| Error::ConversionFailed {
                    name: name.to_string(),
                    source,
                })?;
                // already a valid document; keep the fetched bytes untouched
                (name.to_string(), body)
            }
            SourceKind::TextScript => {
                let extension = name.rsplit_once('.').map(|(_, ext)| ext);
                let dialect = Dialect::detect(extension, &body);
                let notebook = nbopen_notebook::to_notebook(&body, dialect).map_err(|source| {
                    Error::ConversionFailed {
                        name: name.to_string(),
                        source,
                    }
                })?;
                let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
                (format!("{stem}.ipynb"), notebook.to_json_string())
            }
        };

        let path = dir.join(file_name);
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    async fn fetch(&self, url: &Url) -> Result<String, Error> {
        let res = match self.send(url).await {
            Ok(res) => res,
            // one retry, for transport failures only; HTTP statuses are not
            // errors at this stage
            Err(err) if is_transient(&err) => {
                self.send(url).await.map_err(|err| fetch_failed(url, &err))?
            }
            Err(err) => return Err(fetch_failed(url, &err)),
        };

        let status = res.status();
        if !status.is_success() {
            return Err(Error::FetchFailed {
                url: url.clone(),
                message: format!("server returned {status}"),
            });
        }

        let max_body_bytes = self.options.max_body_bytes;
        if let Some(content_length) = res.content_length()
            && content_length > max_body_bytes as u64
        {
            return Err(Error::FetchFailed {
                url: url.clone(),
                message: format!(
                    "response body of {content_length} bytes exceeds max size {max_body_bytes}"
                ),
            });
        }

        let mut body = Vec::new();
        let mut stream = res.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| fetch_failed(url, &err))?;
            if body.len() + chunk.len() > max_body_bytes {
                return Err(Error::FetchFailed {
                    url: url.clone(),
                    message: format!("response body exceeds max size {max_body_bytes} bytes"),
                });
            }
            body.extend_from_slice(&chunk);
        }

        let body = String::from_utf8(body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(body)
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, reqwest::Error> {
        self.client.get(url.clone()).send().await
    }
}

fn fetch_failed(url: &Url, err: &reqwest::Error) -> Error {
    Error::FetchFailed {
        url: url.clone(),
        message: err.to_string(),
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read as _, Write as _},
        net::{Shutdown, TcpListener},
        time::{Duration, Instant},
    };

    use url::Url;

    use super::{Materializer, MaterializerOptions};
    use crate::{Error, FetchDescriptor, SourceKind};

    const NOTEBOOK_JSON: &str = r#"{
  "cells": [
    {"cell_type": "code", "execution_count": null, "metadata": {}, "outputs": [], "source": "x = 1"}
  ],
  "metadata": {},
  "nbformat": 4,
  "nbformat_minor": 5
}
"#;

    enum Step {
        Respond { status: &'static str, body: String },
        CloseAbruptly,
    }

    fn accept_with_deadline(listener: &TcpListener, deadline: Instant) -> std::net::TcpStream {
        loop {
            match listener.accept() {
                Ok((stream, _)) => return stream,
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        panic!("timed out waiting for client connection");
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }

    fn read_request_head(stream: &mut std::net::TcpStream) {
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let read = stream.read(&mut chunk).unwrap();
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
        }
    }

    fn spawn_server(steps: Vec<Step>) -> (Url, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();
        let url = Url::parse(&format!("http://{addr}/demo")).unwrap();

        let handle = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            for step in steps {
                let mut stream = accept_with_deadline(&listener, deadline);
                read_request_head(&mut stream);
                match step {
                    Step::Respond { status, body } => {
                        let response = format!(
                            "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nConnection: \
                             close\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        stream.write_all(response.as_bytes()).unwrap();
                    }
                    Step::CloseAbruptly => {}
                }
                stream.shutdown(Shutdown::Both).unwrap();
            }

            // the script is done; any further request is unexpected
            let quiet_until = Instant::now() + Duration::from_millis(300);
            while Instant::now() < quiet_until {
                if listener.accept().is_ok() {
                    panic!("unexpected extra request");
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        });

        (url, handle)
    }

    fn descriptor(url: Url, source_kind: SourceKind, suggested_filename: &str) -> FetchDescriptor {
        FetchDescriptor {
            retrieval_url: url,
            source_kind,
            suggested_filename: suggested_filename.to_string(),
        }
    }

    fn materializer() -> Materializer {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Materializer::new(client)
    }

    #[tokio::test]
    async fn materializes_notebook_json_into_temp_dir() {
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "200 OK",
            body: NOTEBOOK_JSON.to_string(),
        }]);

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let notebook = materializer().materialize(&descriptor).await.unwrap();

        assert!(notebook.is_temporary());
        assert_eq!(notebook.path().file_name().unwrap(), "demo.ipynb");
        let written = std::fs::read_to_string(notebook.path()).unwrap();
        assert_eq!(written, NOTEBOOK_JSON);

        let dir = notebook.path().parent().unwrap().to_path_buf();
        drop(notebook);
        assert!(!dir.exists());

        server.join().unwrap();
    }

    #[tokio::test]
    async fn converts_percent_script() {
        let script = "# %% [markdown]\n# ## Demo\n\n# %%\nprint(1)\n";
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "200 OK",
            body: script.to_string(),
        }]);

        let descriptor = descriptor(url, SourceKind::TextScript, "demo.py");
        let notebook = materializer().materialize(&descriptor).await.unwrap();

        assert_eq!(notebook.path().file_name().unwrap(), "demo.ipynb");
        let written = std::fs::read_to_string(notebook.path()).unwrap();
        let document: nbopen_notebook::Notebook = written.parse().unwrap();
        assert_eq!(document.cells.len(), 2);
        assert_eq!(document.cells[0].cell_type(), "markdown");
        assert_eq!(document.cells[1].cell_type(), "code");

        server.join().unwrap();
    }

    #[tokio::test]
    async fn invalid_notebook_json_is_conversion_failed() {
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "200 OK",
            body: r#"{"nbformat": 4}"#.to_string(),
        }]);

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let err = materializer().materialize(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::ConversionFailed { .. }));

        server.join().unwrap();
    }

    #[tokio::test]
    async fn http_error_is_fetch_failed_without_retry() {
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "404 Not Found",
            body: "missing".to_string(),
        }]);

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let err = materializer().materialize(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::FetchFailed { .. }));

        // the server panics on a second request; joining cleanly proves the
        // 404 was not retried
        server.join().unwrap();
    }

    #[tokio::test]
    async fn retries_once_after_abrupt_close() {
        let (url, server) = spawn_server(vec![
            Step::CloseAbruptly,
            Step::Respond {
                status: "200 OK",
                body: NOTEBOOK_JSON.to_string(),
            },
        ]);

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let notebook = materializer().materialize(&descriptor).await.unwrap();
        assert_eq!(notebook.path().file_name().unwrap(), "demo.ipynb");

        server.join().unwrap();
    }

    #[tokio::test]
    async fn sustained_transport_failure_is_fetch_failed() {
        // reserve a port with nothing listening behind it
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{addr}/demo.ipynb")).unwrap();

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let err = materializer().materialize(&descriptor).await.unwrap_err();
        assert!(matches!(err, Error::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn oversized_body_is_fetch_failed() {
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "200 OK",
            body: "x".repeat(4096),
        }]);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let materializer = Materializer::with_options(
            client,
            MaterializerOptions {
                max_body_bytes: 1024,
            },
        );

        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let err = materializer.materialize(&descriptor).await.unwrap_err();
        let Error::FetchFailed { message, .. } = err else {
            panic!("expected FetchFailed");
        };
        assert!(message.contains("max size"));

        server.join().unwrap();
    }

    #[tokio::test]
    async fn materialize_into_keeps_the_file() {
        let (url, server) = spawn_server(vec![Step::Respond {
            status: "200 OK",
            body: NOTEBOOK_JSON.to_string(),
        }]);

        let out = tempfile::tempdir().unwrap();
        let descriptor = descriptor(url, SourceKind::NotebookJson, "demo.ipynb");
        let notebook = materializer()
            .materialize_into(&descriptor, out.path())
            .await
            .unwrap();

        assert!(!notebook.is_temporary());
        let path = notebook.path().to_path_buf();
        drop(notebook);
        assert!(path.exists());

        server.join().unwrap();
    }
}
