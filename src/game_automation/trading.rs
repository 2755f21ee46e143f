//! Shop trading
//!
//! On a shop screen the offer panel is read, a [`TradePolicy`] decides
//! between buying, selling or leaving, and [`TradeDesk`] taps the matching
//! buttons. The balance comes from the same currency extraction the
//! classifier uses and is tracked locally between reads.

use super::actions::DeviceActions;
use super::classifier::SceneClassifier;
use super::resolver::RelativePoint;
use super::stats::StatusHandle;
use super::types::Frame;
use crate::adb::AdbClient;
use crate::config::TradingConfig;
use crate::vision::{TextRecognizer, ocr};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

const SOLD_OUT_TOKENS: [&str; 2] = ["售罄", "不可用"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
    pub item: String,
    pub price: u64,
    pub available: bool,
}

/// Item name and price from the offer panel text.
///
/// The item is the first token carrying a letter, the price the longest
/// number on the panel (the first one on ties).
pub fn parse_offer(texts: &[&str]) -> Option<TradeOffer> {
    let joined = texts.join(" ");
    let price = ocr::numbers(&joined)
        .map(|n| (n.to_string().len(), n))
        .fold(None, |best: Option<(usize, u64)>, (len, n)| match best {
            Some((best_len, _)) if best_len >= len => best,
            _ => Some((len, n)),
        })
        .map(|(_, n)| n)?;
    let item = joined
        .split_whitespace()
        .find(|token| token.chars().any(char::is_alphabetic))
        .map(|token| {
            token
                .trim_end_matches(|c: char| c.is_ascii_digit() || matches!(c, ':' | '：' | ','))
                .to_string()
        })
        .filter(|item| !item.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let available = !SOLD_OUT_TOKENS.iter().any(|t| joined.contains(t));
    Some(TradeOffer {
        item,
        price,
        available,
    })
}

/// True when any shop keyword appears in `text`.
pub fn is_trade_screen(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| text.contains(k.as_str()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub side: TradeSide,
    pub item: String,
    pub price: u64,
    pub success: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradePolicy {
    pub max_buy_price: u64,
    pub min_sell_price: u64,
    pub cooldown: Duration,
}

impl From<&TradingConfig> for TradePolicy {
    fn from(config: &TradingConfig) -> Self {
        Self {
            max_buy_price: config.max_buy_price,
            min_sell_price: config.min_sell_price,
            cooldown: config.cooldown(),
        }
    }
}

impl TradePolicy {
    /// Buying needs a known balance covering the price. Nothing trades
    /// inside the cooldown or on an unavailable offer.
    pub fn decide(
        &self,
        offer: &TradeOffer,
        credits: Option<u64>,
        since_last: Option<Duration>,
    ) -> Option<TradeSide> {
        if !offer.available || since_last.is_some_and(|elapsed| elapsed < self.cooldown) {
            return None;
        }
        if offer.price <= self.max_buy_price && credits.is_some_and(|c| c >= offer.price) {
            return Some(TradeSide::Buy);
        }
        if offer.price >= self.min_sell_price {
            return Some(TradeSide::Sell);
        }
        None
    }
}

#[derive(Debug, Default)]
struct DeskState {
    credits: Option<u64>,
    last_trade: Option<Instant>,
    history: Vec<TradeRecord>,
}

pub struct TradeDesk<D: AdbClient, R: TextRecognizer> {
    actions: Arc<DeviceActions<D>>,
    classifier: Arc<SceneClassifier<R>>,
    status: StatusHandle,
    config: TradingConfig,
    policy: TradePolicy,
    state: Mutex<DeskState>,
}

impl<D: AdbClient, R: TextRecognizer> TradeDesk<D, R> {
    pub fn new(
        actions: Arc<DeviceActions<D>>,
        classifier: Arc<SceneClassifier<R>>,
        status: StatusHandle,
        config: TradingConfig,
    ) -> Self {
        Self {
            actions,
            classifier,
            status,
            policy: TradePolicy::from(&config),
            config,
            state: Mutex::new(DeskState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_trade_screen(&self, text: &str) -> bool {
        is_trade_screen(text, &self.config.screen_keywords)
    }

    pub fn credits(&self) -> Option<u64> {
        self.lock().credits
    }

    pub fn history(&self) -> Vec<TradeRecord> {
        self.lock().history.clone()
    }

    /// Read the offer and balance, then trade or back out.
    pub async fn handle(&self, frame: &Frame) -> bool {
        if let Some(credits) = self
            .classifier
            .read_currency(frame, self.config.credits_region)
            .await
        {
            self.lock().credits = Some(credits);
            self.status.set_currency(credits);
        }

        let panel = self.classifier.read_region(frame, self.config.offer_region).await;
        let panel: Vec<&str> = panel.iter().map(String::as_str).collect();
        let Some(offer) = parse_offer(&panel) else {
            log::info!("🛒 No readable offer, leaving the shop");
            return self.tap_button(frame, self.config.cancel_button).await;
        };

        let (credits, since_last) = {
            let state = self.lock();
            (state.credits, state.last_trade.map(|at| at.elapsed()))
        };
        match self.policy.decide(&offer, credits, since_last) {
            Some(side) => self.execute(frame, side, &offer).await,
            None => {
                log::info!(
                    "🛒 Skipping {} at {} (credits {credits:?})",
                    offer.item,
                    offer.price
                );
                self.tap_button(frame, self.config.cancel_button).await
            }
        }
    }

    async fn execute(&self, frame: &Frame, side: TradeSide, offer: &TradeOffer) -> bool {
        let button = match side {
            TradeSide::Buy => self.config.buy_button,
            TradeSide::Sell => self.config.sell_button,
        };
        log::info!("💱 {side} {} for {}", offer.item, offer.price);
        let success = self.tap_button(frame, button).await
            && self.tap_button(frame, self.config.confirm_button).await;

        let credits = {
            let mut state = self.lock();
            if success {
                state.credits = state.credits.map(|c| match side {
                    TradeSide::Buy => c.saturating_sub(offer.price),
                    TradeSide::Sell => c.saturating_add(offer.price),
                });
                state.last_trade = Some(Instant::now());
            }
            state.history.push(TradeRecord {
                side,
                item: offer.item.clone(),
                price: offer.price,
                success,
                at: Utc::now(),
            });
            state.credits
        };
        if let Some(credits) = credits.filter(|_| success) {
            self.status.set_currency(credits);
        }
        self.status.log_operation(
            side.as_str(),
            success,
            Some(format!("{} @ {}", offer.item, offer.price)),
        );
        success
    }

    async fn tap_button(&self, frame: &Frame, (fx, fy): (f64, f64)) -> bool {
        let (w, h) = frame.dimensions();
        let tapped = self.actions.tap(RelativePoint::new(fx, fy).at(w, h)).await;
        self.actions.pause_short().await;
        tapped
    }
}
