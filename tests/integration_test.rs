use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use flate2::read::GzDecoder;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    io::Read,
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{net::TcpListener, sync::oneshot};

use light_measure::{
    create_light_controller, create_power_meter, resolve_answers, ColorMode, MeasureConfig,
    MeasureError, Measurer, Prompter,
};

const TOKEN: &str = "test_token";
const LIGHT: &str = "light.test_bulb";
const SENSOR: &str = "sensor.test_plug_power";
const STANDBY_WATT: f64 = 0.4;

/// Mock Home Assistant with one dimmable light and a plug measuring it.
/// The plug reports brightness / 10 W while the light is on.
#[derive(Default)]
struct MockHomeAssistant {
    brightness: Mutex<Option<u32>>,
    service_calls: Mutex<Vec<(String, Value)>>,
}

impl MockHomeAssistant {
    fn power(&self) -> f64 {
        match *self.brightness.lock().unwrap() {
            Some(bri) => bri as f64 / 10.0,
            None => STANDBY_WATT,
        }
    }

    fn service_calls(&self) -> Vec<(String, Value)> {
        self.service_calls.lock().unwrap().clone()
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/api/states/:entity_id", get(read_state))
            .route("/api/services/:domain/:service", post(call_service))
            .with_state(self)
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false)
}

async fn read_state(
    State(ha): State<Arc<MockHomeAssistant>>,
    Path(entity_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    let now = Utc::now().to_rfc3339();
    let light_state = if ha.brightness.lock().unwrap().is_some() {
        "on"
    } else {
        "off"
    };
    match entity_id.as_str() {
        LIGHT => Ok(Json(json!({
            "entity_id": LIGHT,
            "state": light_state,
            "attributes": { "min_mireds": 153, "max_mireds": 454 },
            "last_changed": now,
            "last_updated": now
        }))),
        SENSOR => Ok(Json(json!({
            "entity_id": SENSOR,
            "state": ha.power().to_string(),
            "attributes": { "unit_of_measurement": "W" },
            "last_changed": now,
            "last_updated": now
        }))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn call_service(
    State(ha): State<Arc<MockHomeAssistant>>,
    Path((domain, service)): Path<(String, String)>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::UNAUTHORIZED);
    }
    match (domain.as_str(), service.as_str()) {
        ("light", "turn_on") => {
            let bri = data["brightness"].as_u64().ok_or(StatusCode::BAD_REQUEST)?;
            *ha.brightness.lock().unwrap() = Some(bri as u32);
        }
        ("light", "turn_off") => *ha.brightness.lock().unwrap() = None,
        ("homeassistant", "update_entity") => {}
        _ => return Err(StatusCode::BAD_REQUEST),
    }
    ha.service_calls
        .lock()
        .unwrap()
        .push((format!("{domain}.{service}"), data));
    Ok(Json(json!([])))
}

/// Start mock Home Assistant HTTP server
async fn start_mock_ha_server() -> (Arc<MockHomeAssistant>, SocketAddr, oneshot::Sender<()>) {
    let mock_server = Arc::new(MockHomeAssistant::default());
    let app = mock_server.clone().create_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock Home Assistant server shutting down");
            }
        }
    });

    (mock_server, addr, shutdown_tx)
}

/// Every answer is preset, so any question is a test failure
struct NoQuestions;

impl Prompter for NoQuestions {
    fn select(&mut self, prompt: &str, _items: &[&str], _default: usize) -> light_measure::Result<usize> {
        Err(MeasureError::Prompt(format!("unexpected question: {prompt}")))
    }

    fn confirm(&mut self, prompt: &str, _default: bool) -> light_measure::Result<bool> {
        Err(MeasureError::Prompt(format!("unexpected question: {prompt}")))
    }

    fn input(&mut self, prompt: &str, _default: Option<&str>) -> light_measure::Result<String> {
        Err(MeasureError::Prompt(format!("unexpected question: {prompt}")))
    }
}

fn config_for(ha_addr: SocketAddr, export_dir: &std::path::Path, extra: &[(&str, &str)]) -> MeasureConfig {
    let export_dir = export_dir.to_string_lossy().to_string();
    let url = format!("http://{ha_addr}/api/");
    let mut vars: HashMap<String, String> = [
        ("POWER_METER", "hass"),
        ("LIGHT_CONTROLLER", "hass"),
        ("HASS_URL", url.as_str()),
        ("HASS_TOKEN", TOKEN),
        ("EXPORT_DIR", export_dir.as_str()),
        ("SLEEP_INITIAL", "0"),
        ("SLEEP_STANDBY", "0"),
        ("SLEEP_TIME", "0"),
        ("SLEEP_TIME_SAMPLE", "0"),
        ("SLEEP_TIME_HUE", "0"),
        ("SLEEP_TIME_SAT", "0"),
        ("SLEEP_TIME_CT", "0"),
        ("SAMPLE_COUNT", "2"),
        ("BRI_BRI_STEPS", "64"),
        ("SELECTED_LIGHT", LIGHT),
        ("SELECTED_POWER_ENTITY", SENSOR),
        ("SELECTED_COLOR_MODE", "brightness"),
        ("SELECTED_GENERATE_MODEL_JSON", "true"),
        ("SELECTED_GZIP", "true"),
        ("SELECTED_MULTIPLE_LIGHTS", "false"),
        ("SELECTED_MODEL_ID", "LWB010"),
        ("SELECTED_MODEL_NAME", "Hue White A60"),
        ("SELECTED_MEASURE_DEVICE", "Test plug"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert(k.to_string(), v.to_string());
    }
    MeasureConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn measurer_for(config: MeasureConfig) -> Measurer {
    let answers = resolve_answers(&config, &mut NoQuestions).unwrap();
    let meter = create_power_meter(&config, &answers).unwrap();
    let controller = create_light_controller(&config, &answers).unwrap();
    Measurer::new(config, answers, meter, controller, Box::new(NoQuestions))
}

#[tokio::test]
async fn test_full_brightness_measurement() {
    let (mock_ha, ha_addr, _ha_shutdown) = start_mock_ha_server().await;
    let export = tempfile::tempdir().unwrap();
    let config = config_for(ha_addr, export.path(), &[]);
    assert_eq!(config.preset.color_mode, Some(ColorMode::Brightness));

    let summary = measurer_for(config).run().await.unwrap();

    assert_eq!(summary.standby_power, STANDBY_WATT);
    assert_eq!(summary.rows_written, 5);
    assert_eq!(summary.rows_skipped, 0);
    assert_eq!(
        summary.output_path,
        export.path().join("LWB010").join("brightness.csv.gz")
    );

    let mut csv = String::new();
    GzDecoder::new(std::fs::File::open(&summary.output_path).unwrap())
        .read_to_string(&mut csv)
        .unwrap();
    assert_eq!(
        csv,
        "bri,watt\n1,0.1\n65,6.5\n129,12.9\n193,19.3\n255,25.5\n"
    );
    assert!(!export.path().join("LWB010").join("brightness.csv").exists());

    let model_path = summary.model_json.expect("model.json should be written");
    let model: Value =
        serde_json::from_str(&std::fs::read_to_string(model_path).unwrap()).unwrap();
    assert_eq!(model["name"], "Hue White A60");
    assert_eq!(model["standby_power"], STANDBY_WATT);
    assert_eq!(model["measure_device"], "Test plug");
    assert_eq!(model["measure_settings"]["COLOR_MODE"], "brightness");
    assert_eq!(model["measure_settings"]["SAMPLE_COUNT"], 2);
    assert_eq!(model["measure_settings"]["BRI_BRI_STEPS"], 64);

    // Light must be switched off for standby and again at the end
    let calls = mock_ha.service_calls();
    assert_eq!(calls.first().unwrap().0, "light.turn_off");
    assert_eq!(calls.last().unwrap().0, "light.turn_off");
    assert_eq!(
        calls
            .iter()
            .filter(|(service, _)| service == "light.turn_on")
            .count(),
        6, // initial setting plus one per variation
        "unexpected calls: {calls:?}"
    );
    assert!(mock_ha.brightness.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_resume_skips_recorded_rows() {
    let (mock_ha, ha_addr, _ha_shutdown) = start_mock_ha_server().await;
    let export = tempfile::tempdir().unwrap();
    let dir = export.path().join("LWB010");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("brightness.csv"), "bri,watt\n1,0.1\n65,6.5\n").unwrap();

    let config = config_for(
        ha_addr,
        export.path(),
        &[
            ("RESUME", "true"),
            ("SELECTED_GZIP", "false"),
            ("SELECTED_GENERATE_MODEL_JSON", "false"),
            ("HASS_CALL_UPDATE_ENTITY_SERVICE", "true"),
        ],
    );

    let summary = measurer_for(config).run().await.unwrap();

    assert_eq!(summary.rows_skipped, 2);
    assert_eq!(summary.rows_written, 3);
    assert_eq!(summary.model_json, None);
    assert_eq!(
        std::fs::read_to_string(summary.output_path).unwrap(),
        "bri,watt\n1,0.1\n65,6.5\n129,12.9\n193,19.3\n255,25.5\n"
    );
    assert!(mock_ha
        .service_calls()
        .iter()
        .any(|(service, data)| service == "homeassistant.update_entity"
            && data["entity_id"] == SENSOR));
}

#[tokio::test]
async fn test_wrong_token_is_reported() {
    let (_mock_ha, ha_addr, _ha_shutdown) = start_mock_ha_server().await;
    let export = tempfile::tempdir().unwrap();
    let config = config_for(ha_addr, export.path(), &[("HASS_TOKEN", "wrong")]);

    let err = measurer_for(config).run().await.unwrap_err();

    assert!(
        err.to_string().contains("HASS_TOKEN"),
        "unexpected error: {err}"
    );
    assert!(!export.path().join("LWB010").exists());
}
