//! Authentication Models

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub country: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // Balance overrides, pricing, all transactions
    #[serde(rename = "member")]
    Member, // Buys credits and generates selfies
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Member => "member",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "member" | "user" => Some(UserRole::Member),
            _ => None,
        }
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub email: String,
    pub role: UserRole,
    pub exp: usize, // expiration timestamp
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize, // seconds until expiration
    pub role: UserRole,
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub country: String,
    pub role: UserRole,
    pub created_at: String,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            country: user.country.clone(),
            role: user.role.clone(),
            created_at: user.created_at.clone(),
        }
    }
}

/// Lowercased, trimmed email used as the login key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_role_serialization() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let member: UserRole = serde_json::from_str(r#""member""#).unwrap();
        assert_eq!(member, UserRole::Member);
    }

    #[test]
    fn test_user_role_string_conversion() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::Member.as_str(), "member");

        assert_eq!(UserRole::from_str("ADMIN"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str("user"), Some(UserRole::Member));
        assert_eq!(UserRole::from_str("trader"), None);
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "sana@example.com".to_string(),
            full_name: "Sana".to_string(),
            country: "Pakistan".to_string(),
            password_hash: "secret-hash".to_string(),
            role: UserRole::Member,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-hash"));
    }

    #[test]
    fn test_signup_request_camel_case() {
        let req: SignupRequest = serde_json::from_str(
            r#"{"email":"a@b.com","password":"longenough","fullName":"Ali Khan"}"#,
        )
        .unwrap();
        assert_eq!(req.full_name, "Ali Khan");
        assert_eq!(req.country, "");
        assert_eq!(normalize_email("  Ali@Example.COM "), "ali@example.com");
    }
}
