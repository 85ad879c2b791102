//! Subcommand implementations.

use std::io::{self, Write};
use std::path::Path;

use anima_core::api::{ChangePasswordRequest, LoginRequest, ProfileUpdate};
use anima_core::auth::expiry::{self, token_expiry};
use anima_core::{AnalysisRecord, ApiClient, Config, SessionState, SignOutReason};
use anyhow::{Context, Result};
use chrono::DateTime;
use tracing::warn;

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

fn prompt_email(last_email: Option<&str>) -> Result<String> {
    match last_email {
        Some(last) => {
            let input = prompt(&format!("Correo [{}]: ", last))?;
            Ok(if input.is_empty() { last.to_string() } else { input })
        }
        None => prompt("Correo: "),
    }
}

/// Print the notice for a session that ended during the command.
pub fn report_sign_out(client: &ApiClient) {
    if let SessionState::Anonymous {
        reason: Some(reason),
    } = client.session().state()
    {
        if reason != SignOutReason::LoggedOut {
            eprintln!("{}", reason.notice());
        }
    }
}

pub async fn login(client: &ApiClient, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        anyhow::bail!("Email required");
    }
    let password = rpassword::prompt_password("Contraseña: ")?;

    let response = client
        .login(&LoginRequest {
            email: email.clone(),
            password,
        })
        .await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    match response.user_name {
        Some(name) => println!("Bienvenido, {}.", name),
        None => println!("Sesión iniciada."),
    }
    Ok(())
}

pub async fn register(client: &ApiClient, email: String, nombre: String) -> Result<()> {
    let password = rpassword::prompt_password("Contraseña: ")?;
    let confirm = rpassword::prompt_password("Confirmar contraseña: ")?;
    if password != confirm {
        anyhow::bail!("Las contraseñas no coinciden");
    }

    client
        .register(&serde_json::json!({
            "nombre": nombre,
            "email": email,
            "password": password,
        }))
        .await?;
    println!("Registro exitoso. Inicia sesión para continuar.");
    Ok(())
}

pub async fn logout(client: &ApiClient, forget_spotify: bool) -> Result<()> {
    client.logout().await;
    if forget_spotify {
        client.store().clear_third_party_token();
    }
    println!("{}", SignOutReason::LoggedOut.notice());
    Ok(())
}

pub fn status(client: &ApiClient) -> Result<()> {
    let store = client.store();
    let credentials = store.credentials();

    println!("Usuario:        {}", store.user_name().as_deref().unwrap_or("-"));
    println!("Autenticado:    {}", if store.is_authenticated() { "sí" } else { "no" });
    match credentials.access_token_expiry {
        Some(expires_at) => {
            let remaining = expires_at - store.now();
            println!(
                "Token expira:   {} ({} min)",
                expires_at.to_rfc3339(),
                remaining.num_minutes()
            );
        }
        None => println!("Token expira:   -"),
    }
    println!(
        "Refresh token:  {}",
        if credentials.refresh_token.is_some() { "sí" } else { "no" }
    );
    println!(
        "Spotify:        {}",
        if credentials.third_party_token.is_some() { "conectado" } else { "no conectado" }
    );
    Ok(())
}

pub async fn whoami(client: &ApiClient) -> Result<()> {
    let user = client.current_user().await?;
    println!(
        "{} <{}>",
        user.nombre.as_deref().unwrap_or("-"),
        user.email.as_deref().unwrap_or("-")
    );
    Ok(())
}

pub async fn refresh(client: &ApiClient) -> Result<()> {
    client
        .session()
        .refresher()
        .refresh_access_token()
        .await
        .map_err(anima_core::ApiError::from)?;
    println!("Token renovado.");
    Ok(())
}

pub async fn check(client: &ApiClient) -> Result<()> {
    if client.session().check().await {
        println!("Sesión válida.");
        Ok(())
    } else {
        Err(anima_core::ApiError::NotAuthenticated.into())
    }
}

pub async fn analyze(client: &ApiClient, image: &Path, timezone: &str, save: bool) -> Result<()> {
    let data = std::fs::read(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());

    let result = client.analyze_emotion_file(data, &file_name, timezone).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if save {
        let record: AnalysisRecord = serde_json::from_value(result)
            .context("Analysis result is missing emotion or confidence")?;
        // One save per invocation; duplicate suppression only matters to
        // long-lived callers that hold a SaveGuard
        client.save_analysis(&record).await?;
        println!("Análisis guardado.");
    }
    Ok(())
}

pub async fn profile(client: &ApiClient, nombre: Option<String>, email: Option<String>) -> Result<()> {
    if nombre.is_none() && email.is_none() {
        anyhow::bail!("Nothing to update: pass --nombre and/or --email");
    }
    // An email change ends the session; report_sign_out prints the notice
    client.update_profile(&ProfileUpdate { nombre, email }).await?;
    println!("Perfil actualizado.");
    Ok(())
}

pub async fn change_password(client: &ApiClient) -> Result<()> {
    let current_password = rpassword::prompt_password("Contraseña actual: ")?;
    let new_password = rpassword::prompt_password("Nueva contraseña: ")?;
    client
        .change_password(&ChangePasswordRequest {
            current_password,
            new_password,
        })
        .await?;
    println!("Contraseña actualizada.");
    Ok(())
}

pub async fn spotify_connect(client: &ApiClient, state: &str) -> Result<()> {
    client.spotify_exchange(state).await?;
    println!("Spotify conectado.");
    Ok(())
}

pub async fn spotify_status(client: &ApiClient) -> Result<()> {
    if client.spotify_status().await? {
        println!("Spotify conectado.");
    } else {
        println!("Spotify no conectado.");
    }
    Ok(())
}

pub fn decode_token(client: &ApiClient) -> Result<()> {
    let token = client
        .store()
        .access_token()
        .ok_or(anima_core::ApiError::NotAuthenticated)?;
    let claims = expiry::decode_token(&token).context("Stored access token is not a readable JWT")?;

    if let Some(sub) = claims.sub {
        println!("sub: {}", sub);
    }
    if let Some(issued) = claims.iat.and_then(|iat| DateTime::from_timestamp(iat, 0)) {
        println!("iat: {}", issued.to_rfc3339());
    }
    if let Some(expires) = token_expiry(&token) {
        println!("exp: {}", expires.to_rfc3339());
    }
    for (key, value) in &claims.extra {
        println!("{}: {}", key, value);
    }
    Ok(())
}
