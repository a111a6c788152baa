//! Subscription Registry
//!
//! In-memory record of every domain currently subscribed on a session:
//! the fields requested, the symbol keys, and the consumers that receive
//! decoded records.
//!
//! # Design
//!
//! - One descriptor per domain. A second subscribe replaces the previous
//!   descriptor wholesale; fields and symbols are never merged.
//! - Iteration follows insertion order, and replacing a descriptor keeps its
//!   original position. Reconnect replay relies on this ordering.
//! - Each consumer callback is paired with its own context, so the two can
//!   never drift apart.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;

use super::fields::{Domain, Field};
use super::record::CanonicalRecord;

// =============================================================================
// Errors
// =============================================================================

/// Invalid subscription or consumer registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Callback and context lists have different lengths.
    #[error("{callbacks} consumer callbacks but {contexts} contexts")]
    ArityMismatch {
        /// Number of callbacks supplied.
        callbacks: usize,
        /// Number of contexts supplied.
        contexts: usize,
    },

    /// A requested field belongs to another domain.
    #[error("field {field} does not belong to {domain}")]
    ForeignField {
        /// Domain being subscribed.
        domain: Domain,
        /// Offending field.
        field: Field,
    },

    /// A requested field has no positional index.
    #[error("field {field} cannot be requested on a stream")]
    NotSubscribable {
        /// Offending field.
        field: Field,
    },

    /// No fields were requested.
    #[error("no fields requested for {0}")]
    NoFields(Domain),

    /// An explicit symbol list was empty.
    #[error("no symbols requested for {0}")]
    EmptySymbols(Domain),

    /// The principal carries no streamer subscription key.
    #[error("principal has no streamer subscription key")]
    MissingSubscriptionKey,
}

/// Failure reported by a consumer callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ConsumerError(String);

impl ConsumerError {
    /// Create a consumer error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

// =============================================================================
// Consumers
// =============================================================================

/// Opaque per-consumer value handed back on every delivery.
pub type ConsumerContext = Value;

/// Consumer callback signature.
pub type ConsumerCallback =
    Arc<dyn Fn(&[CanonicalRecord], &ConsumerContext) -> Result<(), ConsumerError> + Send + Sync>;

/// A consumer callback together with its context.
#[derive(Clone)]
pub struct ConsumerBinding {
    callback: ConsumerCallback,
    context: ConsumerContext,
}

impl ConsumerBinding {
    /// Bind a callback to a context.
    pub fn new<F>(callback: F, context: ConsumerContext) -> Self
    where
        F: Fn(&[CanonicalRecord], &ConsumerContext) -> Result<(), ConsumerError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            callback: Arc::new(callback),
            context,
        }
    }

    /// Bind a callback with a `null` context.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&[CanonicalRecord], &ConsumerContext) -> Result<(), ConsumerError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(callback, Value::Null)
    }

    /// Pair parallel callback and context lists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ArityMismatch`] when the lengths differ.
    pub fn zip(
        callbacks: Vec<ConsumerCallback>,
        contexts: Vec<ConsumerContext>,
    ) -> Result<Vec<Self>, ConfigurationError> {
        if callbacks.len() != contexts.len() {
            return Err(ConfigurationError::ArityMismatch {
                callbacks: callbacks.len(),
                contexts: contexts.len(),
            });
        }
        Ok(callbacks
            .into_iter()
            .zip(contexts)
            .map(|(callback, context)| Self { callback, context })
            .collect())
    }

    /// The consumer's context.
    #[must_use]
    pub const fn context(&self) -> &ConsumerContext {
        &self.context
    }

    /// Deliver records to the consumer.
    ///
    /// # Errors
    ///
    /// Propagates the callback's own error.
    pub fn invoke(&self, records: &[CanonicalRecord]) -> Result<(), ConsumerError> {
        (self.callback)(records, &self.context)
    }
}

impl fmt::Debug for ConsumerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBinding")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Symbol Keys
// =============================================================================

/// The `keys` parameter of a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolKeys {
    /// Explicit instrument symbols, joined with commas on the wire.
    Symbols(Vec<String>),
    /// A single opaque key sent verbatim.
    Literal(String),
    /// The principal's streamer subscription key, resolved at send time.
    PrincipalKey,
}

impl SymbolKeys {
    /// Build an explicit symbol list.
    pub fn symbols<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Symbols(symbols.into_iter().map(Into::into).collect())
    }

    /// Render the wire value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingSubscriptionKey`] for
    /// [`SymbolKeys::PrincipalKey`] when no key is available.
    pub fn to_wire(&self, principal_key: Option<&str>) -> Result<String, ConfigurationError> {
        match self {
            Self::Symbols(symbols) => Ok(symbols.join(",")),
            Self::Literal(key) => Ok(key.clone()),
            Self::PrincipalKey => principal_key
                .map(str::to_string)
                .ok_or(ConfigurationError::MissingSubscriptionKey),
        }
    }
}

// =============================================================================
// Subscription Descriptor
// =============================================================================

/// What a domain is subscribed with and who consumes it.
#[derive(Debug, Clone)]
pub struct SubscriptionDescriptor {
    domain: Domain,
    fields: Vec<Field>,
    symbols: SymbolKeys,
    consumers: Vec<ConsumerBinding>,
    process_first_data: bool,
}

impl SubscriptionDescriptor {
    /// Create a validated descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when a field belongs to another domain
    /// or has no positional index, when no fields are given, or when an
    /// explicit symbol list is empty.
    pub fn new(
        domain: Domain,
        fields: Vec<Field>,
        symbols: SymbolKeys,
        consumers: Vec<ConsumerBinding>,
    ) -> Result<Self, ConfigurationError> {
        if fields.is_empty() {
            return Err(ConfigurationError::NoFields(domain));
        }
        for field in &fields {
            if field.domain() != domain {
                return Err(ConfigurationError::ForeignField {
                    domain,
                    field: *field,
                });
            }
            if field.definition().index.is_none() {
                return Err(ConfigurationError::NotSubscribable { field: *field });
            }
        }
        if matches!(&symbols, SymbolKeys::Symbols(list) if list.is_empty()) {
            return Err(ConfigurationError::EmptySymbols(domain));
        }

        Ok(Self {
            domain,
            fields,
            symbols,
            consumers,
            process_first_data: false,
        })
    }

    /// Deliver the first data frame after confirmation to the consumers.
    #[must_use]
    pub const fn with_process_first_data(mut self, enabled: bool) -> Self {
        self.process_first_data = enabled;
        self
    }

    /// Subscribed domain.
    #[must_use]
    pub const fn domain(&self) -> Domain {
        self.domain
    }

    /// Requested fields, in request order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Symbol keys.
    #[must_use]
    pub const fn symbols(&self) -> &SymbolKeys {
        &self.symbols
    }

    /// Consumers, in registration order.
    #[must_use]
    pub fn consumers(&self) -> &[ConsumerBinding] {
        &self.consumers
    }

    /// Whether the first data frame after confirmation is delivered.
    #[must_use]
    pub const fn process_first_data(&self) -> bool {
        self.process_first_data
    }

    /// Comma-joined positional indices for the `fields` parameter.
    #[must_use]
    pub fn field_indices(&self) -> String {
        self.fields
            .iter()
            .filter_map(|f| f.definition().index)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Thread-safe, insertion-ordered map from domain to descriptor.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<IndexMap<Domain, SubscriptionDescriptor>>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a descriptor under its domain, returning the one it replaced.
    pub fn put(&self, descriptor: SubscriptionDescriptor) -> Option<SubscriptionDescriptor> {
        self.inner.write().insert(descriptor.domain(), descriptor)
    }

    /// Descriptor for a domain.
    #[must_use]
    pub fn get(&self, domain: Domain) -> Option<SubscriptionDescriptor> {
        self.inner.read().get(&domain).cloned()
    }

    /// Consumers for a domain, cloned out of the lock.
    #[must_use]
    pub fn bindings(&self, domain: Domain) -> Option<Vec<ConsumerBinding>> {
        self.inner
            .read()
            .get(&domain)
            .map(|d| d.consumers().to_vec())
    }

    /// Every descriptor in registry order.
    #[must_use]
    pub fn all(&self) -> Vec<SubscriptionDescriptor> {
        self.inner.read().values().cloned().collect()
    }

    /// Subscribed domains in registry order.
    #[must_use]
    pub fn domains(&self) -> Vec<Domain> {
        self.inner.read().keys().copied().collect()
    }

    /// Remove a domain's descriptor, keeping the order of the rest.
    pub fn remove(&self, domain: Domain) -> Option<SubscriptionDescriptor> {
        self.inner.write().shift_remove(&domain)
    }

    /// Whether a domain has a live descriptor.
    #[must_use]
    pub fn contains(&self, domain: Domain) -> bool {
        self.inner.read().contains_key(&domain)
    }

    /// Number of subscribed domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Drop every descriptor.
    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::fields::{ChartField, QuoteField};

    fn noop() -> ConsumerCallback {
        Arc::new(|_: &[CanonicalRecord], _: &ConsumerContext| Ok(()))
    }

    fn quote_descriptor(symbols: &[&str]) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(
            Domain::Quote,
            vec![
                Field::Quote(QuoteField::Symbol),
                Field::Quote(QuoteField::BidPrice),
            ],
            SymbolKeys::symbols(symbols.iter().copied()),
            vec![ConsumerBinding::from_fn(|_, _| Ok(()))],
        )
        .unwrap()
    }

    fn chart_descriptor() -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(
            Domain::ChartBar,
            vec![Field::Chart(ChartField::Symbol)],
            SymbolKeys::symbols(["XYZ"]),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn zip_rejects_arity_mismatch() {
        let err = ConsumerBinding::zip(vec![noop(), noop()], vec![json!(1)]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::ArityMismatch {
                callbacks: 2,
                contexts: 1
            }
        );
    }

    #[test]
    fn zip_pairs_in_order() {
        let bindings = ConsumerBinding::zip(vec![noop(), noop()], vec![json!("a"), json!("b")])
            .unwrap();
        let contexts: Vec<_> = bindings.iter().map(ConsumerBinding::context).collect();
        assert_eq!(contexts, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn descriptor_rejects_foreign_field() {
        let err = SubscriptionDescriptor::new(
            Domain::Quote,
            vec![Field::Chart(ChartField::Open)],
            SymbolKeys::symbols(["SPY"]),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::ForeignField { .. }));
    }

    #[test]
    fn descriptor_rejects_name_only_field() {
        use crate::domain::fields::OptionField;
        let err = SubscriptionDescriptor::new(
            Domain::OptionContract,
            vec![Field::Option(OptionField::PutCall)],
            SymbolKeys::symbols(["XYZ_011924C50"]),
            Vec::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::NotSubscribable { .. }));
    }

    #[test]
    fn descriptor_rejects_empty_inputs() {
        let no_fields = SubscriptionDescriptor::new(
            Domain::Quote,
            Vec::new(),
            SymbolKeys::symbols(["SPY"]),
            Vec::new(),
        );
        assert_eq!(no_fields.unwrap_err(), ConfigurationError::NoFields(Domain::Quote));

        let no_symbols = SubscriptionDescriptor::new(
            Domain::Quote,
            vec![Field::Quote(QuoteField::Symbol)],
            SymbolKeys::Symbols(Vec::new()),
            Vec::new(),
        );
        assert_eq!(
            no_symbols.unwrap_err(),
            ConfigurationError::EmptySymbols(Domain::Quote)
        );
    }

    #[test]
    fn field_indices_follow_request_order() {
        let descriptor = SubscriptionDescriptor::new(
            Domain::Quote,
            vec![
                Field::Quote(QuoteField::Mark),
                Field::Quote(QuoteField::Symbol),
                Field::Quote(QuoteField::LastSize),
            ],
            SymbolKeys::symbols(["SPY"]),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(descriptor.field_indices(), "49,0,9");
    }

    #[test]
    fn symbol_keys_render() {
        assert_eq!(
            SymbolKeys::symbols(["SPY", "QQQ"]).to_wire(None).unwrap(),
            "SPY,QQQ"
        );
        assert_eq!(
            SymbolKeys::Literal("abc".into()).to_wire(Some("ignored")).unwrap(),
            "abc"
        );
        assert_eq!(SymbolKeys::PrincipalKey.to_wire(Some("k1")).unwrap(), "k1");
        assert_eq!(
            SymbolKeys::PrincipalKey.to_wire(None).unwrap_err(),
            ConfigurationError::MissingSubscriptionKey
        );
    }

    #[test]
    fn replace_keeps_position_and_does_not_merge() {
        let registry = SubscriptionRegistry::new();
        registry.put(quote_descriptor(&["SPY"]));
        registry.put(chart_descriptor());

        let previous = registry.put(quote_descriptor(&["QQQ"]));
        assert!(previous.is_some());

        assert_eq!(registry.domains(), vec![Domain::Quote, Domain::ChartBar]);
        let quote = registry.get(Domain::Quote).unwrap();
        assert_eq!(quote.symbols(), &SymbolKeys::symbols(["QQQ"]));
    }

    #[test]
    fn remove_preserves_order_of_rest() {
        let registry = SubscriptionRegistry::new();
        registry.put(quote_descriptor(&["SPY"]));
        registry.put(chart_descriptor());
        registry.put(
            SubscriptionDescriptor::new(
                Domain::AccountActivity,
                vec![Field::Account(crate::domain::fields::AccountField::SubscriptionKey)],
                SymbolKeys::PrincipalKey,
                Vec::new(),
            )
            .unwrap(),
        );

        assert!(registry.remove(Domain::Quote).is_some());
        assert!(registry.remove(Domain::Quote).is_none());
        assert_eq!(
            registry.domains(),
            vec![Domain::ChartBar, Domain::AccountActivity]
        );
    }

    #[test]
    fn clones_share_state() {
        let registry = SubscriptionRegistry::new();
        let other = registry.clone();
        registry.put(chart_descriptor());
        assert!(other.contains(Domain::ChartBar));
        other.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn bindings_are_cloned_out() {
        let registry = SubscriptionRegistry::new();
        registry.put(quote_descriptor(&["SPY"]));
        assert_eq!(registry.bindings(Domain::Quote).map(|b| b.len()), Some(1));
        assert!(registry.bindings(Domain::TimeSale).is_none());
    }
}
