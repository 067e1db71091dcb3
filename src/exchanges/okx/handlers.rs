use crate::core::errors::ExchangeError;
use crate::core::kernel::SubscriptionKey;
use crate::exchanges::okx::codec::OkxPush;
use crate::exchanges::okx::router::ChannelHandler;
use crate::exchanges::okx::types::{BookLevel, OkxOrderBook, OkxTrade};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn decode_rows<T: DeserializeOwned>(push: &OkxPush) -> Result<Vec<T>, ExchangeError> {
    serde_json::from_value::<Vec<T>>(push.data.clone()).map_err(|e| {
        ExchangeError::DeserializationError(format!(
            "Failed to decode {} data: {}",
            push.channel, e
        ))
    })
}

/// Decodes `trades` pushes and forwards each trade.
///
/// Uses `try_send`: when the consumer falls behind, trades are dropped
/// and counted rather than stalling the router.
#[derive(Debug)]
pub struct TradesHandler {
    tx: mpsc::Sender<OkxTrade>,
    dropped: u64,
}

impl TradesHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OkxTrade>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl ChannelHandler for TradesHandler {
    fn handle(&mut self, push: &OkxPush) -> Result<(), ExchangeError> {
        for trade in decode_rows::<OkxTrade>(push)? {
            match self.tx.try_send(trade) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(trade)) => {
                    self.dropped += 1;
                    warn!(trade_id = %trade.trade_id, dropped = self.dropped, "Trade consumer is full");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Trade consumer gone");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Reconstructed book for one instrument
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBook {
    pub inst_id: String,
    pub bids: BTreeMap<Decimal, BookLevel>,
    pub asks: BTreeMap<Decimal, BookLevel>,
    pub seq_id: Option<i64>,
    pub ts: String,
    /// Set after a gap; updates are ignored until the next snapshot
    pub stale: bool,
}

impl OrderBook {
    pub fn new(inst_id: &str) -> Self {
        Self {
            inst_id: inst_id.to_string(),
            ..Self::default()
        }
    }

    fn replace(&mut self, data: &OkxOrderBook) -> Result<(), ExchangeError> {
        let bids = data.bid_levels()?;
        let asks = data.ask_levels()?;

        self.bids = bids.into_iter().map(|l| (l.price, l)).collect();
        self.asks = asks.into_iter().map(|l| (l.price, l)).collect();
        // Snapshots can carry zero-size rows; drop them like updates do
        self.bids.retain(|_, l| !l.size.is_zero());
        self.asks.retain(|_, l| !l.size.is_zero());
        self.seq_id = data.seq_id;
        self.ts.clone_from(&data.ts);
        self.stale = false;
        Ok(())
    }

    fn apply(&mut self, data: &OkxOrderBook) -> Result<(), ExchangeError> {
        // Parse everything first so a bad row leaves the book untouched
        let bids = data.bid_levels()?;
        let asks = data.ask_levels()?;

        for (side, levels) in [(&mut self.bids, bids), (&mut self.asks, asks)] {
            for level in levels {
                if level.size.is_zero() {
                    side.remove(&level.price);
                } else {
                    side.insert(level.price, level);
                }
            }
        }
        if data.seq_id.is_some() {
            self.seq_id = data.seq_id;
        }
        self.ts.clone_from(&data.ts);
        Ok(())
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.values().next_back()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.values().next()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// What happened to a book after a push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookEvent {
    Snapshot {
        inst_id: String,
        seq_id: Option<i64>,
    },
    Updated {
        inst_id: String,
        seq_id: Option<i64>,
    },
    /// Continuity broke. `expected` is the last applied `seqId` (if any),
    /// `received` the update's `prevSeqId`. The book stays stale until the
    /// venue sends a new snapshot, which happens on every (re)subscribe.
    Gap {
        inst_id: String,
        expected: Option<i64>,
        received: Option<i64>,
    },
}

/// Read access to the books maintained by an [`OrderBookHandler`]
#[derive(Debug, Clone, Default)]
pub struct BookStore {
    books: Arc<RwLock<HashMap<String, OrderBook>>>,
}

impl BookStore {
    pub fn get(&self, inst_id: &str) -> Option<OrderBook> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(inst_id)
            .cloned()
    }

    pub fn instruments(&self) -> Vec<String> {
        self.books
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

type ResyncFn = Box<dyn Fn(&SubscriptionKey) + Send>;

/// Merges `snapshot` and `update` pushes of the `books*` channels into
/// per-instrument books, with `seqId`/`prevSeqId` gap detection.
///
/// Pushes without an action (`books5`, `bbo-tbt`) are full snapshots.
/// A gap leaves the book stale; with [`OrderBookHandler::with_resync`]
/// the handler also asks for a fresh snapshot.
pub struct OrderBookHandler {
    store: BookStore,
    events: mpsc::Sender<BookEvent>,
    resync: Option<ResyncFn>,
}

impl std::fmt::Debug for OrderBookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookHandler")
            .field("store", &self.store)
            .field("resync", &self.resync.is_some())
            .finish()
    }
}

impl OrderBookHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BookEvent>) {
        let (events, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                store: BookStore::default(),
                events,
                resync: None,
            },
            rx,
        )
    }

    /// Called with the subscription of a book that hit a gap, once per gap.
    ///
    /// Typically wired to [`SocketSession::resubscribe`], which makes the
    /// venue send a new snapshot:
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use okx_session::core::kernel::SocketSession;
    /// # use okx_session::exchanges::okx::OrderBookHandler;
    /// # fn wire(session: Arc<SocketSession>) {
    /// let (books, _events) = OrderBookHandler::new(64);
    /// let books = books.with_resync(move |key| {
    ///     if let Err(e) = session.resubscribe(key) {
    ///         tracing::warn!(error = %e, "Book resync failed");
    ///     }
    /// });
    /// # }
    /// ```
    ///
    /// [`SocketSession::resubscribe`]: crate::core::kernel::SocketSession::resubscribe
    pub fn with_resync<F>(mut self, resync: F) -> Self
    where
        F: Fn(&SubscriptionKey) + Send + 'static,
    {
        self.resync = Some(Box::new(resync));
        self
    }

    pub fn store(&self) -> BookStore {
        self.store.clone()
    }

    fn emit(&self, event: BookEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!(?event, "Book event consumer is full");
        }
    }

    fn on_row(
        &self,
        channel: &str,
        inst_id: &str,
        action: Option<&str>,
        data: &OkxOrderBook,
    ) -> Result<(), ExchangeError> {
        let mut books = self
            .store
            .books
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let book = books
            .entry(inst_id.to_string())
            .or_insert_with(|| OrderBook::new(inst_id));

        if action != Some("update") {
            book.replace(data)?;
            let seq_id = book.seq_id;
            drop(books);
            debug!(inst_id, ?seq_id, "Book snapshot");
            self.emit(BookEvent::Snapshot {
                inst_id: inst_id.to_string(),
                seq_id,
            });
            return Ok(());
        }

        if book.stale {
            debug!(inst_id, "Ignoring update for stale book");
            return Ok(());
        }

        let continuous = match (book.seq_id, data.prev_seq_id) {
            // No snapshot yet for this instrument
            (None, _) if book.is_empty() => false,
            (Some(last), Some(prev)) => last == prev,
            _ => true,
        };

        if !continuous {
            book.stale = true;
            let expected = book.seq_id;
            drop(books);
            warn!(inst_id, ?expected, received = ?data.prev_seq_id, "Order book sequence gap");
            self.emit(BookEvent::Gap {
                inst_id: inst_id.to_string(),
                expected,
                received: data.prev_seq_id,
            });
            if let Some(resync) = &self.resync {
                resync(&SubscriptionKey::new(channel, Some(inst_id.to_string())));
            }
            return Ok(());
        }

        book.apply(data)?;
        let seq_id = book.seq_id;
        drop(books);
        self.emit(BookEvent::Updated {
            inst_id: inst_id.to_string(),
            seq_id,
        });
        Ok(())
    }
}

impl ChannelHandler for OrderBookHandler {
    fn handle(&mut self, push: &OkxPush) -> Result<(), ExchangeError> {
        let inst_id = push.inst_id.as_deref().ok_or_else(|| {
            ExchangeError::ParseError(format!("{} push without instId", push.channel))
        })?;

        for row in decode_rows::<OkxOrderBook>(push)? {
            self.on_row(&push.channel, inst_id, push.action.as_deref(), &row)?;
        }
        Ok(())
    }
}

/// Forwards raw pushes of any channel; handy for private channels whose
/// shapes the caller decodes.
#[derive(Debug)]
pub struct ForwardHandler {
    tx: mpsc::Sender<OkxPush>,
}

impl ForwardHandler {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OkxPush>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ChannelHandler for ForwardHandler {
    fn handle(&mut self, push: &OkxPush) -> Result<(), ExchangeError> {
        if let Err(mpsc::error::TrySendError::Full(push)) = self.tx.try_send(push.clone()) {
            warn!(channel = %push.channel, "Push consumer is full");
        }
        Ok(())
    }
}
