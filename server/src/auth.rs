//! Authentifizierung – Token zu Benutzer-ID
//!
//! Die eigentliche Token-Pruefung ist austauschbar. Mitgeliefert wird eine
//! statische Tabelle aus der Konfiguration.

use std::collections::HashMap;

use async_trait::async_trait;
use relais_core::UserId;

/// Prueft ein Token und liefert den zugehoerigen Benutzer
#[async_trait]
pub trait Authentifizierer: Send + Sync + 'static {
    async fn pruefen(&self, token: &str) -> Option<UserId>;
}

/// Statische Token-Tabelle
#[derive(Debug, Clone, Default)]
pub struct TokenTabelle {
    tokens: HashMap<String, UserId>,
}

impl TokenTabelle {
    pub fn neu(tokens: &HashMap<String, String>) -> Self {
        Self {
            tokens: tokens
                .iter()
                .map(|(token, user)| (token.clone(), UserId::neu(user.clone())))
                .collect(),
        }
    }

    pub fn anzahl(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl Authentifizierer for TokenTabelle {
    async fn pruefen(&self, token: &str) -> Option<UserId> {
        // Leere Tokens nie akzeptieren, auch wenn sie konfiguriert sind
        if token.is_empty() {
            return None;
        }
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tabelle() -> TokenTabelle {
        let mut tokens = HashMap::new();
        tokens.insert("geheim".to_string(), "user1".to_string());
        tokens.insert(String::new(), "niemand".to_string());
        TokenTabelle::neu(&tokens)
    }

    #[tokio::test]
    async fn gueltiges_token() {
        assert_eq!(tabelle().pruefen("geheim").await, Some(UserId::from("user1")));
    }

    #[tokio::test]
    async fn unbekanntes_und_leeres_token() {
        let t = tabelle();
        assert_eq!(t.pruefen("falsch").await, None);
        assert_eq!(t.pruefen("").await, None);
    }
}
