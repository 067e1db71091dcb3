//! REST operations as data.
//!
//! Each venue operation is a row: name, verb, path and whether it needs
//! signing. `OkxRest::call` turns a row plus parameters into a request.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub name: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub public: bool,
}

const fn get(name: &'static str, path: &'static str, public: bool) -> Endpoint {
    Endpoint {
        name,
        method: HttpMethod::Get,
        path,
        public,
    }
}

const fn post(name: &'static str, path: &'static str) -> Endpoint {
    Endpoint {
        name,
        method: HttpMethod::Post,
        path,
        public: false,
    }
}

// Public
pub const TIME: Endpoint = get("time", "/api/v5/public/time", true);
pub const INSTRUMENTS: Endpoint = get("instruments", "/api/v5/public/instruments", true);
pub const FUNDING_RATE: Endpoint = get("funding-rate", "/api/v5/public/funding-rate", true);

// Market
pub const TICKER: Endpoint = get("ticker", "/api/v5/market/ticker", true);
pub const TICKERS: Endpoint = get("tickers", "/api/v5/market/tickers", true);
pub const CANDLES: Endpoint = get("candles", "/api/v5/market/candles", true);
pub const HISTORY_CANDLES: Endpoint = get("history-candles", "/api/v5/market/history-candles", true);
pub const BOOKS: Endpoint = get("books", "/api/v5/market/books", true);

// Asset
pub const ASSET_BALANCES: Endpoint = get("asset-balances", "/api/v5/asset/balances", false);
pub const ASSET_VALUATION: Endpoint = get("asset-valuation", "/api/v5/asset/asset-valuation", false);

// Account
pub const BALANCE: Endpoint = get("balance", "/api/v5/account/balance", false);
pub const POSITIONS: Endpoint = get("positions", "/api/v5/account/positions", false);
pub const POSITIONS_HISTORY: Endpoint =
    get("positions-history", "/api/v5/account/positions-history", false);
pub const ACCOUNT_CONFIG: Endpoint = get("account-config", "/api/v5/account/config", false);
pub const MAX_SIZE: Endpoint = get("max-size", "/api/v5/account/max-size", false);
pub const TRADE_FEE: Endpoint = get("trade-fee", "/api/v5/account/trade-fee", false);
pub const INTEREST_LIMITS: Endpoint =
    get("interest-limits", "/api/v5/account/interest-limits", false);
pub const BILLS: Endpoint = get("bills", "/api/v5/account/bills", false);
pub const BILLS_ARCHIVE: Endpoint = get("bills-archive", "/api/v5/account/bills-archive", false);
pub const INTEREST_ACCRUED: Endpoint =
    get("interest-accrued", "/api/v5/account/interest-accrued", false);
pub const INTEREST_RATE: Endpoint = get("interest-rate", "/api/v5/account/interest-rate", false);
pub const SET_POSITION_MODE: Endpoint =
    post("set-position-mode", "/api/v5/account/set-position-mode");
pub const SET_LEVERAGE: Endpoint = post("set-leverage", "/api/v5/account/set-leverage");

// Trade
pub const ORDER: Endpoint = post("order", "/api/v5/trade/order");
pub const ORDER_DETAILS: Endpoint = get("order-details", "/api/v5/trade/order", false);
pub const BATCH_ORDERS: Endpoint = post("batch-orders", "/api/v5/trade/batch-orders");
pub const CANCEL_ORDER: Endpoint = post("cancel-order", "/api/v5/trade/cancel-order");
pub const CLOSE_POSITION: Endpoint = post("close-position", "/api/v5/trade/close-position");
pub const ORDERS_PENDING: Endpoint = get("orders-pending", "/api/v5/trade/orders-pending", false);
pub const ORDER_ALGO: Endpoint = post("order-algo", "/api/v5/trade/order-algo");
pub const CANCEL_ALGOS: Endpoint = post("cancel-algos", "/api/v5/trade/cancel-algos");

pub const ALL: &[Endpoint] = &[
    TIME,
    INSTRUMENTS,
    FUNDING_RATE,
    TICKER,
    TICKERS,
    CANDLES,
    HISTORY_CANDLES,
    BOOKS,
    ASSET_BALANCES,
    ASSET_VALUATION,
    BALANCE,
    POSITIONS,
    POSITIONS_HISTORY,
    ACCOUNT_CONFIG,
    MAX_SIZE,
    TRADE_FEE,
    INTEREST_LIMITS,
    BILLS,
    BILLS_ARCHIVE,
    INTEREST_ACCRUED,
    INTEREST_RATE,
    SET_POSITION_MODE,
    SET_LEVERAGE,
    ORDER,
    ORDER_DETAILS,
    BATCH_ORDERS,
    CANCEL_ORDER,
    CLOSE_POSITION,
    ORDERS_PENDING,
    ORDER_ALGO,
    CANCEL_ALGOS,
];

pub fn lookup(name: &str) -> Option<&'static Endpoint> {
    ALL.iter().find(|endpoint| endpoint.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = ALL.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), ALL.len());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("time"), Some(&TIME));
        assert!(lookup("time").unwrap().public);
        assert_eq!(lookup("batch-orders").unwrap().method, HttpMethod::Post);
        assert!(lookup("withdraw").is_none());
    }

    #[test]
    fn test_writes_are_signed() {
        assert!(ALL
            .iter()
            .filter(|e| e.method == HttpMethod::Post)
            .all(|e| !e.public));
        assert!(ALL.iter().all(|e| e.path.starts_with("/api/v5/")));
    }
}
