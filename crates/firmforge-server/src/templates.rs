//! Hard-coded example specifications served by `/api/templates`.

use serde_json::{json, Value};

pub fn example_templates() -> Value {
    json!({
        "esp32_telemetry": {
            "project_name": "ESP32 Telemetry Node",
            "mcu": "ESP32",
            "description": "Sensor telemetry over UART with persistent config",
            "modules": [
                {"id": "uart0", "name": "uart0", "type": "uart",
                 "parameters": {"baud": 115200}},
                {"id": "temp_sensor", "name": "temp_sensor", "type": "sensor",
                 "parameters": {"sample_hz": 10}},
                {"id": "cfg_store", "name": "cfg_store", "type": "eeprom"}
            ],
            "requirements": [
                "Report temperature once per second",
                "Persist calibration across resets"
            ],
            "optimization_goal": "power"
        },
        "stm32_motor_control": {
            "project_name": "STM32 Motor Controller",
            "mcu": "STM32F407",
            "description": "Closed-loop motor control with watchdog supervision",
            "modules": [
                {"id": "pwm_drive", "name": "pwm_drive", "type": "pwm",
                 "parameters": {"frequency_hz": 20000}},
                {"id": "current_adc", "name": "current_adc", "type": "adc"},
                {"id": "watchdog", "name": "watchdog", "type": "watchdog",
                 "parameters": {"timeout_ms": 50}},
                {"id": "can_bus", "name": "can_bus", "type": "can"}
            ],
            "requirements": [
                "Loop period 50 us",
                "Fail safe on watchdog expiry"
            ],
            "safety_critical": true,
            "optimization_goal": "performance"
        }
    })
}

#[cfg(test)]
mod tests {
    use firmforge_spec::Specification;

    #[test]
    fn every_template_parses_as_a_valid_specification() {
        let templates = super::example_templates();
        for (name, value) in templates.as_object().unwrap() {
            let spec: Specification = serde_json::from_value(value.clone())
                .unwrap_or_else(|e| panic!("template {name} does not parse: {e}"));
            spec.validate()
                .unwrap_or_else(|e| panic!("template {name} invalid: {e}"));
        }
    }
}
