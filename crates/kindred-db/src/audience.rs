//! Tree audience lookup.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use kindred_core::{AudienceResolver, Error, Result};

/// Resolves tree audiences from the `tree_access` relation.
///
/// Every call queries the table; membership changes are visible to the
/// next dispatch.
#[derive(Clone)]
pub struct PgAudienceResolver {
    pool: Pool<Postgres>,
}

impl PgAudienceResolver {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AudienceResolver for PgAudienceResolver {
    async fn users_for_tree(&self, tree_id: &str) -> Result<BTreeSet<String>> {
        let users: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT btrim(user_id) FROM tree_access \
             WHERE tree_id = $1 AND btrim(user_id) <> ''",
        )
        .bind(tree_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(users.into_iter().collect())
    }
}
