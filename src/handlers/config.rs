use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

fn config_json(config: &crate::config::AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "session": {
            "max_tokens": config.session.max_tokens,
            "top_p": config.session.top_p,
            "temperature": config.session.temperature,
            "voice_id": config.session.voice_id,
            "frame_ms": config.session.frame_ms
        },
        "client": {
            "client_id": config.client.client_id,
            "prompts_dir": config.client.prompts_dir,
            "audio_dir": config.client.audio_dir,
            "greeting_file": config.client.greeting_file,
            "error_file": config.client.error_file,
            "trace_dir": config.client.trace_dir
        },
        "performance": {
            "max_concurrent_calls": config.performance.max_concurrent_calls
        },
        "debug": {
            "dump_ai_audio": config.debug.dump_ai_audio,
            "dump_dir": config.debug.dump_dir
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config.update_from_json(&json_str)?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
