use {
    anyhow::Result,
    chatrelay_common::{ChangeSource, Platform},
    chatrelay_oauth::{Credential, CredentialStore, FileCredentialStore},
    chrono::Utc,
    clap::Subcommand,
};

#[derive(Subcommand)]
pub enum CredentialAction {
    /// Show stored credentials (tokens are never printed).
    List,
    /// Store a token obtained elsewhere for a platform.
    Set {
        /// Platform name: twitch, youtube, x.
        platform: Platform,
        /// Access token.
        #[arg(long, env = "CHATRELAY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        /// Refresh token, used to renew the access token before it expires.
        #[arg(long, env = "CHATRELAY_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,
        /// Lifetime of the access token in seconds.
        #[arg(long)]
        expires_in: Option<i64>,
        /// Account login (Twitch nick).
        #[arg(long)]
        login: Option<String>,
        /// Account id (YouTube channel id, X user id).
        #[arg(long)]
        account_id: Option<String>,
    },
    /// Delete the stored credential for a platform.
    Clear { platform: Platform },
}

pub async fn handle_credentials(action: CredentialAction) -> Result<()> {
    // The relay is not running here, so no bus is attached; a running relay
    // picks the change up on its next connect.
    let store = FileCredentialStore::new();
    match action {
        CredentialAction::List => list(&store).await,
        CredentialAction::Set {
            platform,
            access_token,
            refresh_token,
            expires_in,
            login,
            account_id,
        } => {
            let mut credential = Credential::new(access_token);
            if let Some(token) = refresh_token {
                credential = credential.with_refresh_token(token);
            }
            if let Some(secs) = expires_in {
                let at = chrono::Duration::try_seconds(secs)
                    .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
                    .ok_or_else(|| anyhow::anyhow!("--expires-in out of range: {secs}"))?;
                credential = credential.with_expires_at(at);
            }
            if let Some(login) = login {
                credential = credential.with_login(login);
            }
            if let Some(id) = account_id {
                credential = credential.with_account_id(id);
            }
            store
                .save(platform, &credential, ChangeSource::External)
                .await?;
            println!("Stored credential for {platform}");
            Ok(())
        },
        CredentialAction::Clear { platform } => {
            store.clear(platform, ChangeSource::External).await?;
            println!("Cleared credential for {platform}");
            Ok(())
        },
    }
}

async fn list(store: &FileCredentialStore) -> Result<()> {
    println!("Credentials directory: {}", store.dir().display());
    let stored = store.list().await?;
    if stored.is_empty() {
        println!("No credentials stored.");
        return Ok(());
    }

    let now = Utc::now();
    for platform in Platform::ALL {
        if !stored.contains(platform) {
            continue;
        }
        let Some(credential) = store.load(*platform).await? else {
            continue;
        };
        let expiry = match credential.expires_at {
            Some(at) if at <= now => "expired".to_string(),
            Some(at) => {
                let mins = (at - now).num_minutes();
                format!("expires in {}h {}m", mins / 60, mins % 60)
            },
            None => "no expiry".to_string(),
        };
        let refresh = if credential.refresh_token.is_some() {
            "refreshable"
        } else {
            "not refreshable"
        };
        let account = credential
            .login
            .as_deref()
            .or(credential.account_id.as_deref())
            .unwrap_or("-");
        println!("  {:<10} {account:<20} {expiry} ({refresh})", platform.as_str());
    }
    Ok(())
}
