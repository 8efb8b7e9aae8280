use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use rustc_hash::FxHashMap;

use crate::error::AppError;
use crate::gpio::{GpioController, SysfsBackend};
use crate::tasks::TaskRunner;

pub struct AppState<B: SysfsBackend> {
    pub gpio: Arc<GpioController<B>>,
    pub tasks: Arc<TaskRunner>,
    pub pins: Arc<FxHashMap<u32, String>>,
}

impl<B: SysfsBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            gpio: Arc::clone(&self.gpio),
            tasks: Arc::clone(&self.tasks),
            pins: Arc::clone(&self.pins),
        }
    }
}

impl<B: SysfsBackend> AppState<B> {
    fn configured_pin(&self, req: &HttpRequest) -> Result<u32, AppError> {
        let pin = parse_pin(req)?;
        if !self.pins.contains_key(&pin) {
            return Err(AppError::NotFoundPin(pin));
        }
        Ok(pin)
    }
}

impl<B: SysfsBackend + 'static> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/gpios")
                    .route(web::get().to(list_gpios::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin}/value")
                    .route(web::get().to(get_value::<B>))
                    .route(web::post().to(set_value::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin}/export")
                    .route(web::post().to(export_pin::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/gpio/{pin}/unexport")
                    .route(web::post().to(unexport_pin::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/tasks")
                    .route(web::get().to(list_tasks::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/tasks/{name}")
                    .route(web::post().to(run_task::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_gpios<B: SysfsBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.pins.as_ref().clone()))
}

async fn get_value<B: SysfsBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin = state.configured_pin(&req)?;

    let value = state.gpio.read_digital(pin).await?;

    Ok(web::Json(value))
}

async fn set_value<B: SysfsBackend + 'static>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin = state.configured_pin(&req)?;
    let value = parse_value_payload(&body)?;

    state.gpio.write_digital(pin, value).await?;

    Ok(HttpResponse::Ok())
}

async fn export_pin<B: SysfsBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin = state.configured_pin(&req)?;

    state.gpio.ensure_exported(pin).await?;

    Ok(HttpResponse::Ok())
}

async fn unexport_pin<B: SysfsBackend + 'static>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let pin = state.configured_pin(&req)?;

    state.gpio.ensure_unexported(pin).await?;

    Ok(HttpResponse::Ok())
}

async fn list_tasks<B: SysfsBackend + 'static>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.tasks.list()))
}

async fn run_task<B: SysfsBackend + 'static>(
    name: web::Path<String>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let report = state.tasks.run(&name).await?;

    Ok(web::Json(report))
}

fn parse_value_payload(body: &[u8]) -> Result<u8, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty value payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => text
            .trim()
            .parse::<u8>()
            .map_err(|_| AppError::InvalidValue("Value must be an integer".into())),
        _ => Err(AppError::InvalidValue(
            "Value payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_pin(req: &HttpRequest) -> Result<u32, AppError> {
    let pin = req
        .match_info()
        .get("pin")
        .ok_or_else(|| AppError::InvalidValue("Missing pin number".into()))?;

    pin.parse::<u32>()
        .map_err(|_| AppError::InvalidValue("Invalid pin number".into()))
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
