//! Filtered, paged subscription queries.

use ets_core::{EtsError, TenantId};

use crate::subscription::Subscription;

/// Fields a subscription query can filter on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SubscriptionField {
    TenantId,
    Id,
    TriggerId,
    Type,
    Name,
}

impl SubscriptionField {
    fn parse(raw: &str) -> Result<Self, EtsError> {
        match raw {
            "tenantId" => Ok(Self::TenantId),
            "id" => Ok(Self::Id),
            "triggerId" => Ok(Self::TriggerId),
            "type" => Ok(Self::Type),
            "name" => Ok(Self::Name),
            other => Err(EtsError::bad_request(format!("unsupported filter property '{other}'"))),
        }
    }

    fn value_of(&self, s: &Subscription) -> String {
        match self {
            Self::TenantId => s.tenant_id.to_string(),
            Self::Id => s.id.to_string(),
            Self::TriggerId => s.trigger_id.to_string(),
            Self::Type => s.subscription_type.as_str().to_string(),
            Self::Name => s.name.clone(),
        }
    }
}

/// One `field eq value` term, optionally negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFilter {
    pub field: SubscriptionField,
    pub value: String,
    pub not: bool,
}

impl FieldFilter {
    pub fn eq(field: SubscriptionField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
            not: false,
        }
    }

    pub fn ne(field: SubscriptionField, value: impl Into<String>) -> Self {
        Self {
            not: true,
            ..Self::eq(field, value)
        }
    }

    pub fn matches(&self, s: &Subscription) -> bool {
        let actual = self.field.value_of(s);
        let equal = match self.field {
            SubscriptionField::Type => actual.eq_ignore_ascii_case(&self.value),
            _ => actual == self.value,
        };
        equal != self.not
    }
}

/// Tenant-scoped query; filters are AND-ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionQuery {
    pub tenant_id: TenantId,
    pub filters: Vec<FieldFilter>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl SubscriptionQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            filters: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Parse `field eq "value"` / `field ne "value"` terms joined by `and`.
    pub fn with_filter_expr(mut self, expr: &str) -> Result<Self, EtsError> {
        for term in split_and(expr) {
            let mut parts = term.splitn(3, char::is_whitespace);
            let (field, op, value) = match (parts.next(), parts.next(), parts.next()) {
                (Some(f), Some(o), Some(v)) => (f, o, v.trim()),
                _ => return Err(EtsError::bad_request(format!("invalid filter term '{term}'"))),
            };
            let field = SubscriptionField::parse(field)?;
            let value = value.trim_matches('"').to_string();
            let filter = match op {
                "eq" => FieldFilter::eq(field, value),
                "ne" => FieldFilter::ne(field, value),
                other => return Err(EtsError::bad_request(format!("unsupported operator '{other}'"))),
            };
            self.filters.push(filter);
        }
        Ok(self)
    }

    pub fn matches(&self, s: &Subscription) -> bool {
        s.tenant_id == self.tenant_id && self.filters.iter().all(|f| f.matches(s))
    }
}

fn split_and(expr: &str) -> impl Iterator<Item = &str> {
    expr.split(" and ").map(str::trim).filter(|t| !t.is_empty())
}
