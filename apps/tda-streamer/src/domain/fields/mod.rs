//! Field Taxonomy
//!
//! Typed field definitions for every streaming domain. Each field carries
//! its wire name (used by the name-keyed REST payloads), its positional
//! index (used by the streaming payloads), and the kind of value it holds.
//!
//! # Lookup
//!
//! Both lookup modes are total: an unknown name or index resolves to
//! [`FieldLookup::Unsupported`] instead of failing, since the service adds
//! fields without notice.
//!
//! ```rust
//! use tda_streamer::domain::fields::{
//!     ChartField, Domain, Field, resolve_by_index, resolve_by_name,
//! };
//!
//! let by_name = resolve_by_name(Domain::ChartBar, "OPEN");
//! let by_index = resolve_by_index(Domain::ChartBar, "1");
//! assert_eq!(by_name, by_index);
//! assert_eq!(by_name.field(), Some(Field::Chart(ChartField::Open)));
//! ```

mod value;

use std::fmt;

pub use value::{FieldValue, MalformedFieldError, coerce};

// =============================================================================
// Domain
// =============================================================================

/// A logical data channel multiplexed on the streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Level one equity quotes.
    Quote,
    /// One-minute equity chart bars.
    ChartBar,
    /// Level one option quotes and greeks.
    OptionContract,
    /// Equity time and sales prints.
    TimeSale,
    /// Order lifecycle events for the logged-in account.
    AccountActivity,
}

impl Domain {
    /// Every domain, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Quote,
        Self::ChartBar,
        Self::OptionContract,
        Self::TimeSale,
        Self::AccountActivity,
    ];

    /// The service name used on the wire.
    #[must_use]
    pub const fn service(self) -> &'static str {
        match self {
            Self::Quote => "QUOTE",
            Self::ChartBar => "CHART_EQUITY",
            Self::OptionContract => "OPTION",
            Self::TimeSale => "TIMESALE_EQUITY",
            Self::AccountActivity => "ACCT_ACTIVITY",
        }
    }

    /// Resolve a wire service name. Case-insensitive.
    #[must_use]
    pub fn from_service(service: &str) -> Option<Self> {
        let service = service.trim();
        Self::ALL
            .into_iter()
            .find(|d| d.service().eq_ignore_ascii_case(service))
    }

    /// All fields of this domain in taxonomy order.
    #[must_use]
    pub const fn fields(self) -> &'static [Field] {
        match self {
            Self::Quote => QUOTE_FIELDS,
            Self::ChartBar => CHART_FIELDS,
            Self::OptionContract => OPTION_FIELDS,
            Self::TimeSale => TIMESALE_FIELDS,
            Self::AccountActivity => ACCOUNT_FIELDS,
        }
    }

    /// Fields that can be requested on a streaming subscription.
    pub fn positional_fields(self) -> impl Iterator<Item = Field> {
        self.fields()
            .iter()
            .copied()
            .filter(|f| f.definition().index.is_some())
    }

    /// Fields requested by the typed subscribe helpers.
    #[must_use]
    pub fn default_stream_fields(self) -> Vec<Field> {
        let indices: &[u16] = match self {
            Self::Quote => &[0, 1, 2, 3, 49, 4, 5, 9, 24, 50, 51],
            Self::ChartBar => &[0, 1, 2, 3, 4, 5, 6, 7],
            Self::OptionContract => &[0, 2, 3, 4, 8, 9, 10, 20, 21, 22, 32, 41],
            Self::TimeSale => &[0, 1, 2, 3, 4],
            Self::AccountActivity => &[1, 2, 3],
        };
        indices
            .iter()
            .filter_map(|&index| resolve_by_position(self, index).field())
            .collect()
    }

    /// The field holding the instrument symbol (or subscription key).
    #[must_use]
    pub const fn key_field(self) -> Field {
        match self {
            Self::Quote => Field::Quote(QuoteField::Symbol),
            Self::ChartBar => Field::Chart(ChartField::Symbol),
            Self::OptionContract => Field::Option(OptionField::Symbol),
            Self::TimeSale => Field::TimeSale(TimeSaleField::Symbol),
            Self::AccountActivity => Field::Account(AccountField::SubscriptionKey),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service())
    }
}

// =============================================================================
// Field Definitions
// =============================================================================

/// How a field's raw wire value is converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// UTF-8 text.
    Text,
    /// Signed integer (sizes, volumes, sequence numbers).
    Integer,
    /// Binary floating point (volatility, greeks).
    Float,
    /// Exact decimal price.
    Price,
    /// Milliseconds since the Unix epoch.
    TimestampMillis,
}

/// Static description of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldDef {
    /// The field itself.
    pub field: Field,
    /// Name used by name-keyed payloads.
    pub name: &'static str,
    /// Position used by streaming payloads. `None` for name-only or derived fields.
    pub index: Option<u16>,
    /// Value conversion.
    pub kind: ValueKind,
}

impl FieldDef {
    const fn new(field: Field, name: &'static str, index: Option<u16>, kind: ValueKind) -> Self {
        Self {
            field,
            name,
            index,
            kind,
        }
    }
}

/// Any field of any domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Equity quote field.
    Quote(QuoteField),
    /// Chart bar field.
    Chart(ChartField),
    /// Option field.
    Option(OptionField),
    /// Time and sales field.
    TimeSale(TimeSaleField),
    /// Account activity field.
    Account(AccountField),
}

impl Field {
    /// The domain this field belongs to.
    #[must_use]
    pub const fn domain(self) -> Domain {
        match self {
            Self::Quote(_) => Domain::Quote,
            Self::Chart(_) => Domain::ChartBar,
            Self::Option(_) => Domain::OptionContract,
            Self::TimeSale(_) => Domain::TimeSale,
            Self::Account(_) => Domain::AccountActivity,
        }
    }

    /// Full definition of this field.
    #[must_use]
    pub const fn definition(self) -> FieldDef {
        match self {
            Self::Quote(f) => f.definition(),
            Self::Chart(f) => f.definition(),
            Self::Option(f) => f.definition(),
            Self::TimeSale(f) => f.definition(),
            Self::Account(f) => f.definition(),
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.definition().name
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain().service(), self.name())
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Level one equity quote fields.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuoteField {
    Symbol,
    BidPrice,
    AskPrice,
    LastPrice,
    BidSize,
    AskSize,
    LastSize,
    Volatility,
    Description,
    Mark,
    QuoteTimestamp,
    LastTimestamp,
}

impl QuoteField {
    const fn definition(self) -> FieldDef {
        use ValueKind::{Integer, Price, Text, TimestampMillis};
        let (name, index, kind) = match self {
            Self::Symbol => ("symbol", 0, Text),
            Self::BidPrice => ("bidPrice", 1, Price),
            Self::AskPrice => ("askPrice", 2, Price),
            Self::LastPrice => ("lastPrice", 3, Price),
            Self::BidSize => ("bidSize", 4, Integer),
            Self::AskSize => ("askSize", 5, Integer),
            Self::LastSize => ("lastSize", 9, Integer),
            Self::Volatility => ("volatility", 24, ValueKind::Float),
            Self::Description => ("description", 25, Text),
            Self::Mark => ("mark", 49, Price),
            Self::QuoteTimestamp => ("quoteTimestamp", 50, TimestampMillis),
            Self::LastTimestamp => ("lastTimestamp", 51, TimestampMillis),
        };
        FieldDef::new(Field::Quote(self), name, Some(index), kind)
    }
}

const QUOTE_FIELDS: &[Field] = &[
    Field::Quote(QuoteField::Symbol),
    Field::Quote(QuoteField::BidPrice),
    Field::Quote(QuoteField::AskPrice),
    Field::Quote(QuoteField::LastPrice),
    Field::Quote(QuoteField::BidSize),
    Field::Quote(QuoteField::AskSize),
    Field::Quote(QuoteField::LastSize),
    Field::Quote(QuoteField::Volatility),
    Field::Quote(QuoteField::Description),
    Field::Quote(QuoteField::Mark),
    Field::Quote(QuoteField::QuoteTimestamp),
    Field::Quote(QuoteField::LastTimestamp),
];

// =============================================================================
// Chart Bar
// =============================================================================

/// One-minute equity chart bar fields.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChartField {
    Symbol,
    Open,
    High,
    Low,
    Close,
    Volume,
    Sequence,
    Datetime,
}

impl ChartField {
    const fn definition(self) -> FieldDef {
        use ValueKind::{Integer, Price, Text, TimestampMillis};
        let (name, index, kind) = match self {
            Self::Symbol => ("symbol", 0, Text),
            Self::Open => ("open", 1, Price),
            Self::High => ("high", 2, Price),
            Self::Low => ("low", 3, Price),
            Self::Close => ("close", 4, Price),
            Self::Volume => ("volume", 5, Integer),
            Self::Sequence => ("sequence", 6, Integer),
            Self::Datetime => ("datetime", 7, TimestampMillis),
        };
        FieldDef::new(Field::Chart(self), name, Some(index), kind)
    }
}

const CHART_FIELDS: &[Field] = &[
    Field::Chart(ChartField::Symbol),
    Field::Chart(ChartField::Open),
    Field::Chart(ChartField::High),
    Field::Chart(ChartField::Low),
    Field::Chart(ChartField::Close),
    Field::Chart(ChartField::Volume),
    Field::Chart(ChartField::Sequence),
    Field::Chart(ChartField::Datetime),
];

// =============================================================================
// Option Contract
// =============================================================================

/// Level one option fields.
///
/// `ExpirationDate`, `SettlementType` and `PutCall` only appear in the
/// name-keyed chain payloads and cannot be requested on a subscription.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionField {
    Symbol,
    Description,
    Bid,
    Ask,
    Last,
    Volume,
    OpenInterest,
    Volatility,
    BidSize,
    AskSize,
    LastSize,
    StrikePrice,
    Delta,
    Gamma,
    Theta,
    Mark,
    ExpirationDate,
    SettlementType,
    PutCall,
}

impl OptionField {
    const fn definition(self) -> FieldDef {
        use ValueKind::{Float, Integer, Price, Text, TimestampMillis};
        let (name, index, kind) = match self {
            Self::Symbol => ("symbol", Some(0), Text),
            Self::Description => ("description", Some(1), Text),
            Self::Bid => ("bid", Some(2), Price),
            Self::Ask => ("ask", Some(3), Price),
            Self::Last => ("last", Some(4), Price),
            Self::Volume => ("volume", Some(8), Integer),
            Self::OpenInterest => ("openInterest", Some(9), Integer),
            Self::Volatility => ("volatility", Some(10), Float),
            Self::BidSize => ("bidSize", Some(20), Integer),
            Self::AskSize => ("askSize", Some(21), Integer),
            Self::LastSize => ("lastSize", Some(22), Integer),
            Self::StrikePrice => ("strikePrice", Some(24), Price),
            Self::Delta => ("delta", Some(32), Float),
            Self::Gamma => ("gamma", Some(33), Float),
            Self::Theta => ("theta", Some(34), Float),
            Self::Mark => ("mark", Some(41), Price),
            Self::ExpirationDate => ("expirationDate", None, TimestampMillis),
            Self::SettlementType => ("settlementType", None, Text),
            Self::PutCall => ("putCall", None, Text),
        };
        FieldDef::new(Field::Option(self), name, index, kind)
    }
}

const OPTION_FIELDS: &[Field] = &[
    Field::Option(OptionField::Symbol),
    Field::Option(OptionField::Description),
    Field::Option(OptionField::Bid),
    Field::Option(OptionField::Ask),
    Field::Option(OptionField::Last),
    Field::Option(OptionField::Volume),
    Field::Option(OptionField::OpenInterest),
    Field::Option(OptionField::Volatility),
    Field::Option(OptionField::BidSize),
    Field::Option(OptionField::AskSize),
    Field::Option(OptionField::LastSize),
    Field::Option(OptionField::StrikePrice),
    Field::Option(OptionField::Delta),
    Field::Option(OptionField::Gamma),
    Field::Option(OptionField::Theta),
    Field::Option(OptionField::Mark),
    Field::Option(OptionField::ExpirationDate),
    Field::Option(OptionField::SettlementType),
    Field::Option(OptionField::PutCall),
];

// =============================================================================
// Time and Sales
// =============================================================================

/// Equity time and sales fields.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimeSaleField {
    Symbol,
    TradeTime,
    LastPrice,
    LastSize,
    LastSequence,
}

impl TimeSaleField {
    const fn definition(self) -> FieldDef {
        use ValueKind::{Integer, Price, Text, TimestampMillis};
        let (name, index, kind) = match self {
            Self::Symbol => ("symbol", 0, Text),
            Self::TradeTime => ("tradeTime", 1, TimestampMillis),
            Self::LastPrice => ("lastPrice", 2, Price),
            Self::LastSize => ("lastSize", 3, Integer),
            Self::LastSequence => ("lastSequence", 4, Integer),
        };
        FieldDef::new(Field::TimeSale(self), name, Some(index), kind)
    }
}

const TIMESALE_FIELDS: &[Field] = &[
    Field::TimeSale(TimeSaleField::Symbol),
    Field::TimeSale(TimeSaleField::TradeTime),
    Field::TimeSale(TimeSaleField::LastPrice),
    Field::TimeSale(TimeSaleField::LastSize),
    Field::TimeSale(TimeSaleField::LastSequence),
];

// =============================================================================
// Account Activity
// =============================================================================

/// Account activity fields.
///
/// `Status` and `OrderId` are derived while decoding and have no wire key.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountField {
    SubscriptionKey,
    AccountId,
    MessageType,
    MessageData,
    Status,
    OrderId,
}

impl AccountField {
    const fn definition(self) -> FieldDef {
        let (name, index) = match self {
            Self::SubscriptionKey => ("subscriptionKey", Some(0)),
            Self::AccountId => ("accountId", Some(1)),
            Self::MessageType => ("messageType", Some(2)),
            Self::MessageData => ("messageData", Some(3)),
            Self::Status => ("status", None),
            Self::OrderId => ("orderId", None),
        };
        FieldDef::new(Field::Account(self), name, index, ValueKind::Text)
    }
}

const ACCOUNT_FIELDS: &[Field] = &[
    Field::Account(AccountField::SubscriptionKey),
    Field::Account(AccountField::AccountId),
    Field::Account(AccountField::MessageType),
    Field::Account(AccountField::MessageData),
    Field::Account(AccountField::Status),
    Field::Account(AccountField::OrderId),
];

// =============================================================================
// Lookup
// =============================================================================

/// Result of resolving a wire key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLookup {
    /// The key names a field of the domain.
    Known(FieldDef),
    /// The key is not part of the taxonomy.
    Unsupported,
}

impl FieldLookup {
    /// The resolved definition, if any.
    #[must_use]
    pub const fn definition(self) -> Option<FieldDef> {
        match self {
            Self::Known(def) => Some(def),
            Self::Unsupported => None,
        }
    }

    /// The resolved field, if any.
    #[must_use]
    pub const fn field(self) -> Option<Field> {
        match self {
            Self::Known(def) => Some(def.field),
            Self::Unsupported => None,
        }
    }

    /// Whether the key was unrecognised.
    #[must_use]
    pub const fn is_unsupported(self) -> bool {
        matches!(self, Self::Unsupported)
    }
}

/// Resolve a wire name within a domain, ignoring case and surrounding whitespace.
///
/// Derived fields without a wire key never match.
#[must_use]
pub fn resolve_by_name(domain: Domain, raw_name: &str) -> FieldLookup {
    let wanted = raw_name.trim();
    domain
        .fields()
        .iter()
        .map(|f| f.definition())
        .filter(|def| !is_derived(def.field))
        .find(|def| def.name.eq_ignore_ascii_case(wanted))
        .map_or(FieldLookup::Unsupported, FieldLookup::Known)
}

/// Resolve a textual positional index (streaming payload keys are strings).
#[must_use]
pub fn resolve_by_index(domain: Domain, raw_index: &str) -> FieldLookup {
    raw_index
        .trim()
        .parse::<u16>()
        .map_or(FieldLookup::Unsupported, |index| {
            resolve_by_position(domain, index)
        })
}

/// Resolve a numeric positional index.
#[must_use]
pub fn resolve_by_position(domain: Domain, index: u16) -> FieldLookup {
    domain
        .fields()
        .iter()
        .map(|f| f.definition())
        .find(|def| def.index == Some(index))
        .map_or(FieldLookup::Unsupported, FieldLookup::Known)
}

const fn is_derived(field: Field) -> bool {
    matches!(
        field,
        Field::Account(AccountField::Status | AccountField::OrderId)
    )
}

// =============================================================================
// Tests
// =============================================================================
