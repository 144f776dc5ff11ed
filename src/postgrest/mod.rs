//! Table access through the PostgREST API

mod filter;
mod query;

use reqwest::Client;
use serde::Serialize;

use crate::auth::SessionStore;

pub use filter::*;
pub use query::*;

use query::TableContext;

/// Client for one table or view
pub struct TableClient {
    ctx: TableContext,
}

impl TableClient {
    /// Create a new TableClient
    pub(crate) fn new(
        url: &str,
        key: &str,
        schema: &str,
        table: &str,
        client: Client,
        session: SessionStore,
    ) -> Self {
        Self {
            ctx: TableContext {
                url: format!("{}/rest/v1/{}", url, table),
                key: key.to_string(),
                schema: schema.to_string(),
                client,
                session,
            },
        }
    }

    /// Select specific columns from the table
    pub fn select(&self, columns: &str) -> SelectBuilder {
        SelectBuilder::new(self.ctx.clone(), columns)
    }

    /// Insert rows into the table
    pub fn insert<T: Serialize>(&self, values: T) -> InsertBuilder<T> {
        InsertBuilder::new(self.ctx.clone(), values)
    }

    /// Insert rows, merging with existing ones on conflict
    pub fn upsert<T: Serialize>(&self, values: T) -> UpsertBuilder<T> {
        UpsertBuilder::new(self.ctx.clone(), values)
    }

    /// Update rows in the table
    pub fn update<T: Serialize>(&self, values: T) -> UpdateBuilder<T> {
        UpdateBuilder::new(self.ctx.clone(), values)
    }
}
