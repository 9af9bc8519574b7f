//! Terminal search client.
//!
//! Talks to a running daemon over HTTP. Keystrokes (here: input lines) are
//! debounced so only the last query typed within the debounce window is sent.

use std::{future::Future, time::Duration};

use anyhow::bail;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};

use crate::search::{SearchResponse, SearchResult, MIN_QUERY_CHARS};

/// Timer-reset debouncer: scheduling new work cancels work still waiting.
pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn call<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();

        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Waits for the last scheduled call, if any.
    pub async fn flush(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.await;
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum WebResponse<T> {
    Error { error: String },
    Data(T),
}

async fn handle_response<T>(response: reqwest::Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let text = response.text().await?;

    let web_response = serde_json::from_str::<WebResponse<T>>(&text).map_err(|err| {
        log::error!("{err}. tried to parse: {text:?}");
        err
    })?;

    match web_response {
        WebResponse::Data(data) => Ok(data),
        WebResponse::Error { error } => bail!("search failed ({status}): {error}"),
    }
}

#[derive(Clone)]
pub struct SearchClient {
    client: reqwest::Client,
    endpoint: String,
    limit: i64,
}

impl SearchClient {
    pub fn new(endpoint: &str, limit: i64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            limit,
        }
    }

    /// Queries shorter than the server minimum return nothing without a request.
    pub async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchResult>> {
        if !is_searchable(query) {
            return Ok(vec![]);
        }

        log::debug!("{} q={query:?}", self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "q": query, "limit": self.limit }))
            .send()
            .await?;

        Ok(handle_response::<SearchResponse>(response).await?.results)
    }
}

fn is_searchable(query: &str) -> bool {
    query.trim().chars().count() >= MIN_QUERY_CHARS
}

pub fn format_price(price_cents: i64) -> String {
    let sign = if price_cents < 0 { "-" } else { "" };
    let cents = price_cents.unsigned_abs();
    format!("{sign}${}.{:02}", cents / 100, cents % 100)
}

pub fn render(query: &str, results: &[SearchResult]) -> String {
    if results.is_empty() {
        return format!("no products found for {query:?}");
    }

    results
        .iter()
        .map(|result| match result.price_cents {
            Some(price) => format!("{:>4}  {:<28} {}", result.id, result.name, format_price(price)),
            None => format!("{:>4}  {}", result.id, result.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads queries from stdin, one per line, until EOF.
pub async fn run_interactive(client: SearchClient, debounce: Duration) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut debouncer = Debouncer::new(debounce);

    println!("type to search, Ctrl-D to quit");

    while let Some(line) = lines.next_line().await? {
        let query = line.trim().to_string();
        if !is_searchable(&query) {
            // too short to search: drop whatever was waiting
            debouncer.cancel();
            continue;
        }

        let client = client.clone();
        debouncer.call(async move {
            match client.search(&query).await {
                Ok(results) => println!("{}", render(&query, &results)),
                Err(err) => eprintln!("{err}"),
            }
        });
    }

    debouncer.flush().await;
    Ok(())
}
