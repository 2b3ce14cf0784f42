use async_trait::async_trait;
use libsql::params;
use uuid::Uuid;

use crate::db::{Database, now_rfc3339};
use crate::error::ServiceError;
use crate::id::Id;
use crate::rules::TaskStatus;

/// Authenticated caller attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub authorization_id: Id,
    pub user_id: Id,
    pub org_id: Id,
}

/// Newly issued API token. The token is only visible at creation time.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub principal: Principal,
    pub token: String,
}

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    /// Resolves an API token. Unknown or inactive tokens are `Unauthorized`.
    async fn find_by_token(&self, token: &str) -> Result<Principal, ServiceError>;
}

#[derive(Clone)]
pub struct AuthorizationRepository {
    db: Database,
}

impl AuthorizationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn issue(&self, org_id: Id, user_id: Id) -> Result<IssuedToken, ServiceError> {
        let id = Id::generate();
        let token = Uuid::new_v4().simple().to_string();
        let conn = self.db.connection().await?;
        conn.execute(
            "INSERT INTO authorizations (id, token, org_id, user_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
            params![
                id.to_string(),
                token.clone(),
                org_id.to_string(),
                user_id.to_string(),
                now_rfc3339()
            ],
        )
        .await?;

        Ok(IssuedToken {
            principal: Principal {
                authorization_id: id,
                user_id,
                org_id,
            },
            token,
        })
    }

    pub async fn set_status(&self, id: Id, status: TaskStatus) -> Result<(), ServiceError> {
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE authorizations SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )
            .await?;
        if updated == 0 {
            return Err(ServiceError::not_found(format!("authorization {id} not found")));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthorizationService for AuthorizationRepository {
    async fn find_by_token(&self, token: &str) -> Result<Principal, ServiceError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, org_id, status FROM authorizations WHERE token = ?1",
                params![token],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Err(ServiceError::unauthorized("authorization not found"));
        };

        let status: String = row.get(3)?;
        if TaskStatus::from_str(&status) != Some(TaskStatus::Active) {
            return Err(ServiceError::unauthorized("authorization is inactive"));
        }
        let id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let org_id: String = row.get(2)?;
        Ok(Principal {
            authorization_id: id.parse()?,
            user_id: user_id.parse()?,
            org_id: org_id.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::migrations::run_migrations;
    use crate::orgs::{OrganizationRepository, UserRepository};
    use tempfile::TempDir;

    #[tokio::test]
    async fn issued_tokens_resolve_until_deactivated() {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        let org = OrganizationRepository::new(db.clone()).create("acme").await.expect("org");
        let user = UserRepository::new(db.clone()).create("ada").await.expect("user");
        let repo = AuthorizationRepository::new(db);

        let issued = repo.issue(org.id, user.id).await.expect("issue");
        assert_eq!(issued.token.len(), 32);
        let principal = repo.find_by_token(&issued.token).await.expect("resolve");
        assert_eq!(principal, issued.principal);

        repo.set_status(principal.authorization_id, TaskStatus::Inactive)
            .await
            .expect("deactivate");
        let err = repo.find_by_token(&issued.token).await.expect_err("inactive");
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let err = repo.find_by_token("nope").await.expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }
}
