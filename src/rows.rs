//! Forward-only row stream over one response's `results` array.
//!
//! A background task decodes the array one element at a time and hands
//! each element to the consumer through a channel of capacity 1. The task
//! reserves the hand-off slot *before* decoding the next element, so the
//! response is decoded no faster than rows are pulled. Decode failures
//! travel on a separate one-shot signal that the consumer checks first.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{value::RawValue, Value as JsonValue};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::{N1qlError, Result, Row, Signature};

/// What the decode task pushes after the data elements.
#[derive(Debug)]
pub(crate) enum Trailer {
    /// Passthrough pseudo-row, emitted verbatim.
    Record(JsonValue),
    /// Server-reported errors, surfaced after the rows already streamed.
    Error(N1qlError),
}

/// Everything a stream needs from a decoded response envelope.
#[derive(Debug)]
pub(crate) struct StreamParts {
    pub signature: Signature,
    /// Passthrough pseudo-rows emitted before the data.
    pub leading: Vec<JsonValue>,
    /// Undecoded `results` elements.
    pub elements: Vec<Box<RawValue>>,
    /// Set when `results` could not be split into elements.
    pub failure: Option<N1qlError>,
    pub trailer: Option<Trailer>,
}

#[derive(Debug)]
enum Delivery {
    Meta(JsonValue),
    Data(JsonValue),
    Failed(N1qlError),
}

impl From<Trailer> for Delivery {
    fn from(trailer: Trailer) -> Self {
        match trailer {
            Trailer::Record(record) => Self::Meta(record),
            Trailer::Error(err) => Self::Failed(err),
        }
    }
}

#[derive(Debug, Default)]
struct DecodeState {
    closed: AtomicBool,
    decoded: AtomicUsize,
}

impl DecodeState {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

enum Signal {
    Failure(std::result::Result<N1qlError, oneshot::error::RecvError>),
    Element(Option<Delivery>),
}

/// Rows of one query response, pulled with [`RowStream::next`].
pub struct RowStream {
    columns: Arc<[String]>,
    whole_element: bool,
    rx: mpsc::Receiver<Delivery>,
    failure: oneshot::Receiver<N1qlError>,
    failure_settled: bool,
    finished: bool,
    state: Arc<DecodeState>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns)
            .field("finished", &self.finished)
            .finish()
    }
}

impl RowStream {
    /// Starts the decode task. Must be called from within a tokio runtime.
    pub(crate) fn spawn(parts: StreamParts) -> Self {
        let StreamParts {
            signature,
            leading,
            elements,
            failure,
            trailer,
        } = parts;

        let (tx, rx) = mpsc::channel(1);
        let (failure_tx, failure_rx) = oneshot::channel();
        let state = Arc::new(DecodeState::default());
        let feed = Feed {
            tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(feed.run(leading, elements, failure, trailer, failure_tx));

        Self {
            columns: signature.columns().into(),
            whole_element: signature.is_whole_element(),
            rx,
            failure: failure_rx,
            failure_settled: false,
            finished: false,
            state,
            task: Some(task),
        }
    }

    /// Column names, one per row position.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Pulls the next row. `Ok(None)` marks the end of the results.
    ///
    /// A row whose object has more fields than the signature declares fails
    /// with [`N1qlError::Internal`]; the stream can still be advanced after it.
    /// After a decode failure no more data rows follow, but server errors
    /// reported with the response are still returned by the next call.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let signal = tokio::select! {
                biased;
                failure = &mut self.failure, if !self.failure_settled => Signal::Failure(failure),
                element = self.rx.recv() => Signal::Element(element),
            };

            match signal {
                Signal::Failure(Ok(err)) => {
                    self.failure_settled = true;
                    return Err(err);
                }
                // Decode task finished without failing; drain the slot.
                Signal::Failure(Err(_)) => self.failure_settled = true,
                Signal::Element(None) => {
                    self.finished = true;
                    return Ok(None);
                }
                Signal::Element(Some(Delivery::Failed(err))) => {
                    self.finished = true;
                    return Err(err);
                }
                Signal::Element(Some(Delivery::Meta(record))) => {
                    return self.whole_row(&record).map(Some);
                }
                Signal::Element(Some(Delivery::Data(element))) => {
                    return self.project(element).map(Some);
                }
            }
        }
    }

    /// Drains the remaining rows.
    pub async fn try_collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Stops the stream. The decode task halts at its next element boundary.
    pub fn close(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        self.rx.close();
        self.finished = true;
    }

    fn width(&self) -> usize {
        self.columns.len().max(1)
    }

    fn whole_row(&self, element: &JsonValue) -> Result<Row> {
        let mut values = vec![None; self.width()];
        values[0] = Some(encode(element)?);
        Ok(Row::new(Arc::clone(&self.columns), values))
    }

    fn project(&self, element: JsonValue) -> Result<Row> {
        if self.whole_element {
            return self.whole_row(&element);
        }

        let values = match element {
            JsonValue::Object(fields) => {
                if fields.len() > self.columns.len() {
                    return Err(more_columns_than_expected(fields.len(), self.columns.len()));
                }
                self.columns
                    .iter()
                    .map(|column| fields.get(column).map(encode).transpose())
                    .collect::<Result<Vec<_>>>()?
            }
            JsonValue::Array(items) => {
                if items.len() > self.columns.len() {
                    return Err(more_columns_than_expected(items.len(), self.columns.len()));
                }
                let mut values = items
                    .iter()
                    .map(|item| encode(item).map(Some))
                    .collect::<Result<Vec<_>>>()?;
                values.resize(self.columns.len(), None);
                values
            }
            other => return self.whole_row(&other),
        };

        Ok(Row::new(Arc::clone(&self.columns), values))
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        self.state.closed.store(true, Ordering::Release);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn encode(value: &JsonValue) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|err| N1qlError::Decode(format!("cannot re-encode row value: {err}")))
}

fn more_columns_than_expected(got: usize, expected: usize) -> N1qlError {
    N1qlError::Internal(format!("more columns than expected: {got} > {expected}"))
}

/// Producer half, owned by the decode task.
struct Feed {
    tx: mpsc::Sender<Delivery>,
    state: Arc<DecodeState>,
}

impl Feed {
    async fn run(
        self,
        leading: Vec<JsonValue>,
        elements: Vec<Box<RawValue>>,
        mut failure: Option<N1qlError>,
        trailer: Option<Trailer>,
        failure_tx: oneshot::Sender<N1qlError>,
    ) {
        for record in leading {
            if !self.push(Delivery::Meta(record)).await {
                return self.halt();
            }
        }

        if failure.is_none() {
            for element in elements {
                let Some(permit) = self.slot().await else {
                    return self.halt();
                };
                match serde_json::from_str::<JsonValue>(element.get()) {
                    Ok(value) => {
                        self.state.decoded.fetch_add(1, Ordering::Relaxed);
                        permit.send(Delivery::Data(value));
                    }
                    Err(err) => {
                        failure = Some(N1qlError::Decode(format!(
                            "cannot decode result row: {err}"
                        )));
                        break;
                    }
                }
            }
        }

        if let Some(err) = failure {
            // Holding the slot means every earlier delivery was taken.
            let Some(_permit) = self.slot().await else {
                return self.halt();
            };
            let _ = failure_tx.send(err);
        }

        if let Some(trailer) = trailer {
            self.push(trailer.into()).await;
        }
    }

    fn stopped(&self) -> bool {
        self.state.is_closed() || self.tx.is_closed()
    }

    /// Waits until the hand-off slot is free. `None` once the consumer closed.
    async fn slot(&self) -> Option<mpsc::Permit<'_, Delivery>> {
        if self.stopped() {
            return None;
        }
        let permit = self.tx.reserve().await.ok()?;
        if self.state.is_closed() {
            return None;
        }
        Some(permit)
    }

    async fn push(&self, delivery: Delivery) -> bool {
        match self.slot().await {
            Some(permit) => {
                permit.send(delivery);
                true
            }
            None => false,
        }
    }

    fn halt(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "row stream closed after {} decoded elements",
            self.state.decoded.load(Ordering::Relaxed)
        );
    }
}
