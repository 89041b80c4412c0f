//! Configuration du contrôleur VOD.
//!
//! Toutes les valeurs ont un défaut ; une section `vod:` partielle dans
//! `config.yaml` suffit. Les divergences historiques entre les deux variantes
//! du lecteur (seuil haut, encodage de la vitesse, démarrage automatique,
//! réaction aux erreurs du sink) sont exposées ici plutôt que figées.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VodError};

/// Profil codec fixe de la cible d'ajout
pub const DEFAULT_CODEC: &str = r#"video/mp4; codecs="avc1.42E01E,mp4a.40.2""#;

/// Seuil haut de la file : au-delà, on envoie `pause` au serveur
pub const DEFAULT_HIGH_WATER_MARK: usize = 512;

const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/vod";
const DEFAULT_APPEND_BACKOFF_MS: u64 = 1000;
const DEFAULT_APPEND_POLL_MS: u64 = 100;
const DEFAULT_EOS_RETRY_MS: u64 = 500;
const DEFAULT_HEALTH_POLL_MS: u64 = 1000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Quand `set_source` ouvre le canal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPolicy {
    /// Attendre `play()`
    #[default]
    Deferred,
    /// Démarrer immédiatement
    Eager,
}

/// Réaction à un événement `error` du sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkErrorPolicy {
    /// Journaliser seulement ; la reprise reste pilotée par le canal
    #[default]
    Absorb,
    /// Reconstruire le canal à la dernière position connue
    Retry,
}

/// Encodage de la vitesse dans la requête `start`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedEncoding {
    #[default]
    Raw,
    /// Logarithme binaire (1 → 0, 2 → 1, 0.5 → -1)
    Log2,
}

impl SpeedEncoding {
    pub fn encode(self, speed: f64) -> f64 {
        match self {
            SpeedEncoding::Raw => speed,
            SpeedEncoding::Log2 => speed.log2(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VodConfig {
    /// Adresse WebSocket du serveur de flux
    pub server_url: String,
    pub codec: String,
    pub high_water_mark: usize,
    /// Délai avant de réessayer un ajout refusé par le sink
    pub append_backoff_ms: u64,
    /// Intervalle de revérification quand le contrôle de flux diffère l'ajout
    pub append_poll_ms: u64,
    pub eos_retry_ms: u64,
    /// Intervalle du contrôle de santé du buffer après une perte de connexion
    pub health_poll_ms: u64,
    pub reconnect_delay_ms: u64,
    /// Reconnexion automatique au niveau transport
    pub reconnect: bool,
    pub max_reconnect_attempts: u32,
    pub start_policy: StartPolicy,
    pub sink_error_policy: SinkErrorPolicy,
    pub speed_encoding: SpeedEncoding,
}

impl Default for VodConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            codec: DEFAULT_CODEC.to_string(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            append_backoff_ms: DEFAULT_APPEND_BACKOFF_MS,
            append_poll_ms: DEFAULT_APPEND_POLL_MS,
            eos_retry_ms: DEFAULT_EOS_RETRY_MS,
            health_poll_ms: DEFAULT_HEALTH_POLL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            reconnect: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            start_policy: StartPolicy::default(),
            sink_error_policy: SinkErrorPolicy::default(),
            speed_encoding: SpeedEncoding::default(),
        }
    }
}

impl VodConfig {
    pub fn validate(&self) -> Result<()> {
        if self.high_water_mark == 0 {
            return Err(VodError::InvalidConfig(
                "high_water_mark must be at least 1".to_string(),
            ));
        }
        if self.codec.trim().is_empty() {
            return Err(VodError::InvalidConfig("codec must not be empty".to_string()));
        }
        let intervals = [
            ("append_backoff_ms", self.append_backoff_ms),
            ("append_poll_ms", self.append_poll_ms),
            ("eos_retry_ms", self.eos_retry_ms),
            ("health_poll_ms", self.health_poll_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(VodError::InvalidConfig(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }

    pub fn append_backoff(&self) -> Duration {
        Duration::from_millis(self.append_backoff_ms)
    }

    pub fn append_poll(&self) -> Duration {
        Duration::from_millis(self.append_poll_ms)
    }

    pub fn eos_retry(&self) -> Duration {
        Duration::from_millis(self.eos_retry_ms)
    }

    pub fn health_poll(&self) -> Duration {
        Duration::from_millis(self.health_poll_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
