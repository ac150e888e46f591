//! Account lookup for the verification gate

use std::sync::Arc;

use async_trait::async_trait;
use chorus_agent::AccountResolver;

use crate::catalog::Catalog;

/// How an identifier is matched against the customer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    CustomerId,
    Phone,
    Email,
    Unrecognized,
}

impl IdentifierKind {
    pub fn classify(identifier: &str) -> Self {
        let identifier = identifier.trim();
        if !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_digit()) {
            IdentifierKind::CustomerId
        } else if identifier.starts_with('+') {
            IdentifierKind::Phone
        } else if identifier.contains('@') {
            IdentifierKind::Email
        } else {
            IdentifierKind::Unrecognized
        }
    }
}

pub struct CatalogResolver {
    catalog: Arc<Catalog>,
}

impl CatalogResolver {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    fn lookup(&self, identifier: &str) -> crate::catalog::Result<Option<i64>> {
        match IdentifierKind::classify(identifier) {
            IdentifierKind::CustomerId => {
                let Ok(id) = identifier.parse::<i64>() else {
                    return Ok(None);
                };
                Ok(self.catalog.customer_exists(id)?.then_some(id))
            }
            IdentifierKind::Phone => self.catalog.customer_by_phone(identifier),
            IdentifierKind::Email => self.catalog.customer_by_email(identifier),
            IdentifierKind::Unrecognized => Ok(None),
        }
    }
}

#[async_trait]
impl AccountResolver for CatalogResolver {
    async fn resolve(&self, identifier: &str) -> chorus_agent::Result<String> {
        let identifier = identifier.trim();
        let found = self
            .lookup(identifier)
            .map_err(|e| chorus_agent::Error::Capability(e.to_string()))?;
        tracing::debug!(
            kind = ?IdentifierKind::classify(identifier),
            found = found.is_some(),
            "Resolved identifier"
        );
        Ok(found.map(|id| id.to_string()).unwrap_or_default())
    }
}
