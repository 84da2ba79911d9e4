//! Strategie für den Austausch der Connectivity Candidates

use super::error::CallError;
use super::peer::PeerTransport;
use crate::signaling::SessionDescription;
use serde::{Deserialize, Serialize};

/// Trickle: Candidates werden einzeln gesendet, sobald sie entdeckt werden.
/// Single-Shot: es wird auf das Ende des Gatherings gewartet und eine
/// Description mit allen Candidates gesendet, nie ein `ice-candidate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NegotiationStrategy {
    #[default]
    Trickle,
    SingleShot,
}

impl NegotiationStrategy {
    pub fn sends_candidates(self) -> bool {
        self == NegotiationStrategy::Trickle
    }

    /// Liefert die Description, die tatsächlich gesendet wird
    pub async fn finalize_local(
        self,
        transport: &dyn PeerTransport,
        created: SessionDescription,
    ) -> Result<SessionDescription, CallError> {
        match self {
            NegotiationStrategy::Trickle => Ok(created),
            NegotiationStrategy::SingleShot => {
                let gathered = transport.gathered_local_description().await?;
                if gathered.kind != created.kind {
                    return Err(CallError::InvalidDescription(format!(
                        "gathered {:?} but created {:?}",
                        gathered.kind, created.kind
                    )));
                }
                Ok(gathered)
            }
        }
    }
}

impl std::str::FromStr for NegotiationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trickle" => Ok(NegotiationStrategy::Trickle),
            "single-shot" => Ok(NegotiationStrategy::SingleShot),
            other => Err(format!("unknown negotiation strategy '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_engine::peer::PeerFactory;
    use crate::call_engine::session::CallId;
    use crate::testing::FakePeerFactory;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn single_shot_sends_the_gathered_description() {
        let factory = FakePeerFactory::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = factory.create(CallId::new(), tx).await.unwrap();

        let created = peer.create_offer().await.unwrap();
        peer.set_local_description(created.clone()).await.unwrap();

        let trickle = NegotiationStrategy::Trickle
            .finalize_local(peer.as_ref(), created.clone())
            .await
            .unwrap();
        assert_eq!(trickle, created);

        let single = NegotiationStrategy::SingleShot
            .finalize_local(peer.as_ref(), created.clone())
            .await
            .unwrap();
        assert_eq!(single.kind, created.kind);
        assert!(single.sdp.contains("a=candidate"));
    }

    #[test]
    fn parses_config_names() {
        assert_eq!(
            "single-shot".parse::<NegotiationStrategy>(),
            Ok(NegotiationStrategy::SingleShot)
        );
        assert!("bulk".parse::<NegotiationStrategy>().is_err());
        assert!(NegotiationStrategy::default().sends_candidates());
        assert!(!NegotiationStrategy::SingleShot.sends_candidates());
    }
}
