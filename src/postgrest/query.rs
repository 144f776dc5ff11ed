//! Query builders for TableClient

use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

use crate::auth::SessionStore;
use crate::error::Error;
use crate::fetch::{Fetch, FetchBuilder};
use crate::postgrest::filter::*;

const CLIENT_INFO: &str = concat!("mechanic-dispatch/", env!("CARGO_PKG_VERSION"));

/// Everything a builder needs to reach one table
#[derive(Clone)]
pub(crate) struct TableContext {
    pub(crate) url: String,
    pub(crate) key: String,
    pub(crate) schema: String,
    pub(crate) client: Client,
    pub(crate) session: SessionStore,
}

impl TableContext {
    /// Attach key, bearer token and schema headers. `write` selects
    /// `Content-Profile` over `Accept-Profile`.
    fn authorize<'a>(&self, fetch: FetchBuilder<'a>, write: bool) -> FetchBuilder<'a> {
        let token = self.session.access_token().unwrap_or_else(|| self.key.clone());
        let mut fetch = fetch
            .header("apikey", &self.key)
            .header("X-Client-Info", CLIENT_INFO)
            .bearer_auth(&token);
        if self.schema != "public" {
            let profile = if write { "Content-Profile" } else { "Accept-Profile" };
            fetch = fetch.header(profile, &self.schema);
        }
        fetch
    }
}

/// Builder for SELECT queries
pub struct SelectBuilder {
    ctx: TableContext,
    columns: String,
    filters: Filters,
    order: Option<String>,
    limit: Option<usize>,
}

impl SelectBuilder {
    pub(crate) fn new(ctx: TableContext, columns: &str) -> Self {
        Self {
            ctx,
            columns: columns.to_string(),
            filters: Filters::new(),
            order: None,
            limit: None,
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<T: ToString>(&mut self, column: &str, value: T) -> &mut Self {
        self.filters.equals(column, &value.to_string());
        self
    }

    /// Filter rows where column does not equal a value
    pub fn neq<T: ToString>(&mut self, column: &str, value: T) -> &mut Self {
        self.filters
            .push(column, FilterOperator::Neq, &value.to_string());
        self
    }

    /// Filter rows where column is in a list of values
    pub fn in_list<T: ToString>(&mut self, column: &str, values: &[T]) -> &mut Self {
        self.filters.in_list(column, values);
        self
    }

    /// Filter rows where column is null
    pub fn is_null(&mut self, column: &str) -> &mut Self {
        self.filters.is_null(column);
        self
    }

    /// Filter rows matching any of the conditions
    pub fn or(&mut self, conditions: &[(&str, FilterOperator, &str)]) -> &mut Self {
        self.filters.or(conditions);
        self
    }

    /// Order the results by a column
    pub fn order(&mut self, column: &str, ascending: bool) -> &mut Self {
        let direction = if ascending { "asc" } else { "desc" };
        self.order = Some(format!("{}.{}", column, direction));
        self
    }

    /// Limit the number of rows returned
    pub fn limit(&mut self, count: usize) -> &mut Self {
        self.limit = Some(count);
        self
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.params().iter().cloned());
        if let Some(order) = &self.order {
            params.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Execute the query and return the results
    pub async fn execute<T: DeserializeOwned>(&self) -> Result<Vec<T>, Error> {
        let fetch = Fetch::get(&self.ctx.client, &self.ctx.url).query(self.params());
        self.ctx.authorize(fetch, false).execute::<Vec<T>>().await
    }

    /// Execute the query and return the first row
    pub async fn execute_one<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Error> {
        self.limit(1);
        let results = self.execute::<T>().await?;
        Ok(results.into_iter().next())
    }
}

/// Builder for INSERT queries
pub struct InsertBuilder<T: Serialize> {
    ctx: TableContext,
    values: T,
}

impl<T: Serialize> InsertBuilder<T> {
    pub(crate) fn new(ctx: TableContext, values: T) -> Self {
        Self { ctx, values }
    }

    /// Execute the insert and return the inserted rows
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        let fetch = Fetch::post(&self.ctx.client, &self.ctx.url)
            .header("Prefer", "return=representation")
            .json(&self.values)?;
        self.ctx.authorize(fetch, true).execute::<Vec<R>>().await
    }
}

/// Builder for UPSERT queries
pub struct UpsertBuilder<T: Serialize> {
    ctx: TableContext,
    values: T,
    on_conflict: Option<String>,
}

impl<T: Serialize> UpsertBuilder<T> {
    pub(crate) fn new(ctx: TableContext, values: T) -> Self {
        Self {
            ctx,
            values,
            on_conflict: None,
        }
    }

    /// Set the conflict target columns
    pub fn on_conflict(&mut self, columns: &str) -> &mut Self {
        self.on_conflict = Some(columns.to_string());
        self
    }

    /// Execute the upsert and return the stored rows
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        let mut fetch = Fetch::post(&self.ctx.client, &self.ctx.url)
            .header("Prefer", "return=representation,resolution=merge-duplicates");
        if let Some(columns) = &self.on_conflict {
            fetch = fetch.query([("on_conflict", columns.as_str())]);
        }
        let fetch = fetch.json(&self.values)?;
        self.ctx.authorize(fetch, true).execute::<Vec<R>>().await
    }
}

/// Builder for UPDATE queries
pub struct UpdateBuilder<T: Serialize> {
    ctx: TableContext,
    values: T,
    filters: Filters,
}

impl<T: Serialize> UpdateBuilder<T> {
    pub(crate) fn new(ctx: TableContext, values: T) -> Self {
        Self {
            ctx,
            values,
            filters: Filters::new(),
        }
    }

    /// Filter rows where column equals a value
    pub fn eq<V: ToString>(&mut self, column: &str, value: V) -> &mut Self {
        self.filters.equals(column, &value.to_string());
        self
    }

    /// Filter rows where column is in a list of values
    pub fn in_list<V: ToString>(&mut self, column: &str, values: &[V]) -> &mut Self {
        self.filters.in_list(column, values);
        self
    }

    /// Filter rows where column is null
    pub fn is_null(&mut self, column: &str) -> &mut Self {
        self.filters.is_null(column);
        self
    }

    /// Filter rows matching any of the conditions
    pub fn or(&mut self, conditions: &[(&str, FilterOperator, &str)]) -> &mut Self {
        self.filters.or(conditions);
        self
    }

    /// Execute the update and return the rows it touched.
    ///
    /// An unfiltered update is refused rather than rewriting the table.
    pub async fn execute<R: DeserializeOwned>(&self) -> Result<Vec<R>, Error> {
        if self.filters.is_empty() {
            return Err(Error::validation("refusing to update without a filter"));
        }
        let fetch = Fetch::patch(&self.ctx.client, &self.ctx.url)
            .header("Prefer", "return=representation")
            .query(self.filters.params().iter().cloned())
            .json(&self.values)?;
        self.ctx.authorize(fetch, true).execute::<Vec<R>>().await
    }
}
