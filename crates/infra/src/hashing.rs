//! bcrypt on the blocking pool, so hashing never stalls an executor thread.

use warden_auth::{PasswordError, hash_password, verify_password};

use crate::error::ServiceResult;

pub(crate) async fn hash(password: &str) -> ServiceResult<String> {
    let password = password.to_string();
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PasswordError::Hash(e.to_string()))??;
    Ok(hashed)
}

pub(crate) async fn verify(password: &str, hash: &str) -> ServiceResult<bool> {
    let (password, hash) = (password.to_string(), hash.to_string());
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| PasswordError::Hash(e.to_string()))?;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_then_verify_off_the_executor() {
        let hashed = hash("correct horse").await.unwrap();
        assert!(verify("correct horse", &hashed).await.unwrap());
        assert!(!verify("wrong horse", &hashed).await.unwrap());
    }
}
