//! Handlers for the agent's verbs.

use secrecy::SecretString;
use swift_agent_core::protocol::{format_auth_response, verb, PURGED, RELOADED, UNLOCKED};
use swift_agent_core::{AgentError, CapabilityDocument};

use crate::dispatch::{Dispatcher, HandlerFuture};
use crate::session::SessionManager;

/// The dispatcher serving every agent verb.
pub fn agent_dispatcher() -> Dispatcher<SessionManager> {
    Dispatcher::new()
        .register(verb::RELOAD, reload)
        .register(verb::UNLOCK, unlock)
        .register(verb::PURGE, purge)
        .register(verb::AUTH, auth)
        .register(verb::REAUTH, reauth)
        .register(verb::INFO, info)
        .register(verb::REINFO, reinfo)
}

fn required<'a>(verb: &str, args: &'a str, what: &str) -> Result<&'a str, AgentError> {
    let arg = args.trim();
    if arg.is_empty() {
        return Err(AgentError::InvalidArgument(format!("{verb} requires {what}")));
    }
    Ok(arg)
}

fn document_line(doc: &CapabilityDocument) -> Result<String, AgentError> {
    serde_json::to_string(doc).map_err(|e| AgentError::Daemon(e.to_string()))
}

fn reload<'a>(session: &'a SessionManager, _args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        session.reload().await?;
        Ok(RELOADED.to_string())
    })
}

fn unlock<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let (auth_id, password) = args
            .split_once(' ')
            .filter(|(id, _)| !id.is_empty())
            .ok_or_else(|| {
                AgentError::InvalidArgument("unlock requires an auth id and a password".into())
            })?;
        session
            .unlock(auth_id, SecretString::from(password.to_string()))
            .await?;
        Ok(UNLOCKED.to_string())
    })
}

fn purge<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let target = required(verb::PURGE, args, "an auth id or url")?;
        session.purge(target).await;
        Ok(PURGED.to_string())
    })
}

fn auth<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let auth_id = required(verb::AUTH, args, "an auth id")?;
        Ok(format_auth_response(&session.auth(auth_id).await?))
    })
}

fn reauth<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let auth_id = required(verb::REAUTH, args, "an auth id")?;
        Ok(format_auth_response(&session.reauth(auth_id).await?))
    })
}

fn info<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let url = required(verb::INFO, args, "a url")?;
        document_line(&session.info(url).await?)
    })
}

fn reinfo<'a>(session: &'a SessionManager, args: &'a str) -> HandlerFuture<'a> {
    Box::pin(async move {
        let url = required(verb::REINFO, args, "a url")?;
        document_line(&session.reinfo(url).await?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Outcome, TestRig};

    const URL: &str = "https://cluster.example/v1/AUTH_x";

    #[test]
    fn every_verb_is_registered() {
        assert_eq!(
            agent_dispatcher().verbs(),
            vec!["auth", "info", "purge", "reauth", "reinfo", "reload", "unlock"]
        );
    }

    #[tokio::test]
    async fn auth_without_expiry() {
        let rig = TestRig::new().with_auth("myswift", Outcome::ok(URL, "tok123"));
        let session = rig.session();
        let out = agent_dispatcher().dispatch(&session, "auth myswift").await;
        assert_eq!(out, "auth https://cluster.example/v1/AUTH_x tok123");
    }

    #[tokio::test]
    async fn unknown_auth_is_an_error_line() {
        let session = TestRig::new().session();
        let out = agent_dispatcher().dispatch(&session, "auth nope").await;
        assert!(out.starts_with("ERROR "), "{out}");
    }

    #[tokio::test]
    async fn missing_arguments_are_rejected() {
        let session = TestRig::new().session();
        let dispatcher = agent_dispatcher();
        for line in ["auth", "reauth ", "info", "purge", "unlock prod", "unlock  pw"] {
            let out = dispatcher.dispatch(&session, line).await;
            assert!(out.starts_with("ERROR "), "{line}: {out}");
        }
    }

    #[tokio::test]
    async fn unlock_password_may_contain_spaces() {
        let rig = TestRig::new().with_auth("prod", Outcome::needs_password(URL, "tok"));
        let session = rig.session();
        let out = agent_dispatcher()
            .dispatch(&session, "unlock prod correct horse")
            .await;
        assert_eq!(out, "unlocked");
        assert_eq!(
            rig.constructions(),
            vec![("prod".to_string(), Some("correct horse".to_string()))]
        );
    }

    #[tokio::test]
    async fn password_required_reaches_the_wire() {
        let rig = TestRig::new().with_auth("prod", Outcome::needs_password(URL, "tok"));
        let session = rig.session();
        let out = agent_dispatcher().dispatch(&session, "auth prod").await;
        assert!(out.starts_with("ERROR PasswordRequired("), "{out}");
    }

    #[tokio::test]
    async fn info_is_one_json_line() {
        let rig = TestRig::new().with_document("https://cluster.example", r#"{"swift": {}}"#);
        let session = rig.session();
        let out = agent_dispatcher()
            .dispatch(&session, &format!("info {URL}"))
            .await;
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert!(doc.get("swift").is_some());
        assert!(doc["timestamp"].is_f64());
    }

    #[tokio::test]
    async fn purge_and_reload_acknowledge() {
        let session = TestRig::new().session();
        let dispatcher = agent_dispatcher();
        assert_eq!(dispatcher.dispatch(&session, "purge anything").await, "purged");
        assert_eq!(dispatcher.dispatch(&session, "reload").await, "reloaded");
    }
}
