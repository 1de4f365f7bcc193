//! Pipeline topology as data: asset models and assets, the Athena pivot view,
//! Lookout for Equipment documents, the ingest fan-out and the score alarm.
//!
//! Nothing here calls AWS. The deployment tooling renders these values into
//! resource definitions and state machine inputs.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ingest::IngestRequest;
use crate::scores::SENSOR_SCORE_SUFFIX;

pub const ENGINE_SENSOR_COUNT: usize = 30;
pub const ASSET_SCORE_PROPERTY: &str = "AssetL4EScore";
pub const AVG_SCORE_PROPERTY: &str = "AVG L4E Score";
pub const TOTAL_SCORE_PROPERTY: &str = "Total L4E Score";
pub const ALARM_THRESHOLD_PROPERTY: &str = "L4E Alarm Threshold";
pub const METRIC_WINDOW: &str = "5m";
pub const ENGINE_HIERARCHY: &str = "EngineHierarchy";
pub const GREATER_OR_EQUAL: &str = "GREATER_OR_EQUAL";
pub const ALARM_COMPOSITE_MODEL: &str = "l4eAlarm";
pub const ALARM_COMPOSITE_TYPE: &str = "AWS/ALARM";
pub const ALARM_TYPE_PROPERTY: &str = "AWS/ALARM_TYPE";
pub const ALARM_STATE_PROPERTY: &str = "AWS/ALARM_STATE";
pub const ALARM_SOURCE: &str = "IOT_EVENTS";
pub const NOTIFICATION_ENABLED: &str = "ENABLED";
pub const WORKFLOW_WAIT_SECONDS: u32 = 60;
pub const VIEW_LOOKBACK_MINUTES: u32 = 6;

pub fn sensor_names(count: usize) -> Vec<String> {
    (0..count).map(|n| format!("Sensor{}", n)).collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "typeName")]
pub enum PropertyKind {
    Attribute {
        #[serde(rename = "defaultValue")]
        default_value: String,
    },
    Measurement,
    Metric {
        expression: String,
        variable: MetricVariable,
        window: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricVariable {
    pub name: String,
    pub property_logical_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hierarchy_logical_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelProperty {
    pub name: String,
    pub logical_id: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(rename = "type")]
    pub kind: PropertyKind,
}

impl ModelProperty {
    fn attribute(name: &str, logical_id: &str, data_type: &str, default_value: &str) -> Self {
        Self {
            name: name.to_string(),
            logical_id: logical_id.to_string(),
            data_type: data_type.to_string(),
            data_type_spec: None,
            unit: None,
            kind: PropertyKind::Attribute {
                default_value: default_value.to_string(),
            },
        }
    }

    fn measurement(name: &str) -> Self {
        Self {
            name: name.to_string(),
            logical_id: name.replace(' ', ""),
            data_type: "DOUBLE".to_string(),
            data_type_spec: None,
            unit: Some("None".to_string()),
            kind: PropertyKind::Measurement,
        }
    }

    fn metric(name: &str, expression: &str, variable: MetricVariable) -> Self {
        Self {
            name: name.to_string(),
            logical_id: name.replace(' ', ""),
            data_type: "DOUBLE".to_string(),
            data_type_spec: None,
            unit: None,
            kind: PropertyKind::Metric {
                expression: expression.to_string(),
                variable,
                window: METRIC_WINDOW.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelHierarchy {
    pub logical_id: String,
    pub name: String,
    pub child_asset_model: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeModel {
    pub name: String,
    #[serde(rename = "type")]
    pub composite_type: String,
    pub composite_model_properties: Vec<ModelProperty>,
}

/// Alarm state slot that IoT Events writes into
pub fn alarm_composite_model() -> CompositeModel {
    let state = ModelProperty {
        name: ALARM_STATE_PROPERTY.to_string(),
        logical_id: ALARM_STATE_PROPERTY.to_string(),
        data_type: "STRUCT".to_string(),
        data_type_spec: Some(ALARM_STATE_PROPERTY.to_string()),
        unit: None,
        kind: PropertyKind::Measurement,
    };

    CompositeModel {
        name: ALARM_COMPOSITE_MODEL.to_string(),
        composite_type: ALARM_COMPOSITE_TYPE.to_string(),
        composite_model_properties: vec![
            ModelProperty::attribute(ALARM_TYPE_PROPERTY, ALARM_TYPE_PROPERTY, "STRING", ALARM_SOURCE),
            state,
        ],
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetModelDeclaration {
    pub asset_model_name: String,
    pub asset_model_description: String,
    pub asset_model_properties: Vec<ModelProperty>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_model_hierarchies: Vec<ModelHierarchy>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_model_composite_models: Vec<CompositeModel>,
}

impl AssetModelDeclaration {
    pub fn property(&self, name: &str) -> Option<&ModelProperty> {
        self.asset_model_properties.iter().find(|p| p.name == name)
    }
}

/// Engine model: attributes, raw sensors, per-sensor and per-asset scores,
/// the 5 minute average score and the alarm composite model.
pub fn engine_asset_model(id: &str) -> AssetModelDeclaration {
    let mut properties = vec![
        ModelProperty::attribute("Make", "MakeAttribute", "STRING", "Cummins"),
        ModelProperty::attribute("Model", "ModelAttribute", "STRING", "QSK60"),
        ModelProperty::attribute("SerialNumber", "SerialNumberAttribute", "STRING", "1234567890"),
        ModelProperty::attribute("Location", "LocationAttribute", "STRING", "Engine Room #1"),
        ModelProperty::attribute(
            ALARM_THRESHOLD_PROPERTY,
            "L4EAlarmThresholdAttribute",
            "DOUBLE",
            "0.9",
        ),
    ];

    let sensors = sensor_names(ENGINE_SENSOR_COUNT);
    properties.extend(sensors.iter().map(|s| ModelProperty::measurement(s)));
    properties.extend(
        sensors
            .iter()
            .map(|s| ModelProperty::measurement(&format!("{}{}", s, SENSOR_SCORE_SUFFIX))),
    );
    properties.push(ModelProperty::measurement(ASSET_SCORE_PROPERTY));
    properties.push(ModelProperty::metric(
        AVG_SCORE_PROPERTY,
        "AVG(score)",
        MetricVariable {
            name: "score".to_string(),
            property_logical_id: ASSET_SCORE_PROPERTY.to_string(),
            hierarchy_logical_id: None,
        },
    ));

    AssetModelDeclaration {
        asset_model_name: format!("{}EngineAssetModel", id),
        asset_model_description: "Engine Asset Model".to_string(),
        asset_model_properties: properties,
        asset_model_hierarchies: Vec::new(),
        asset_model_composite_models: vec![alarm_composite_model()],
    }
}

/// Vessel model summing its engines' average scores
pub fn vessel_asset_model(id: &str, engine_model: &str) -> AssetModelDeclaration {
    let properties = vec![
        ModelProperty::attribute(
            "ReliabilityManager",
            "ReliabilityManagerAttribute",
            "STRING",
            "John Doe",
        ),
        ModelProperty::attribute("Code", "CodeAttribute", "STRING", "1234567890"),
        ModelProperty::attribute(
            "CountryOfRegistration",
            "CountryOfRegistrationAttribute",
            "STRING",
            "USA",
        ),
        ModelProperty::attribute(
            "VesselAbnormalyThreshold",
            "VesselAbnormalyThresholdAttribute",
            "DOUBLE",
            "1.8",
        ),
        ModelProperty::metric(
            TOTAL_SCORE_PROPERTY,
            "SUM(score)",
            MetricVariable {
                name: "score".to_string(),
                property_logical_id: AVG_SCORE_PROPERTY.replace(' ', ""),
                hierarchy_logical_id: Some(ENGINE_HIERARCHY.to_string()),
            },
        ),
    ];

    AssetModelDeclaration {
        asset_model_name: format!("{}VesselAssetModel", id),
        asset_model_description: "Vessel Asset Model".to_string(),
        asset_model_properties: properties,
        asset_model_hierarchies: vec![ModelHierarchy {
            logical_id: ENGINE_HIERARCHY.to_string(),
            name: "Engine".to_string(),
            child_asset_model: engine_model.to_string(),
        }],
        asset_model_composite_models: Vec::new(),
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetPropertyNotification {
    pub logical_id: String,
    pub notification_state: String,
}

impl AssetPropertyNotification {
    fn enabled(logical_id: &str) -> Self {
        Self {
            logical_id: logical_id.to_string(),
            notification_state: NOTIFICATION_ENABLED.to_string(),
        }
    }
}

/// Child asset linked under a model hierarchy, referenced by asset name
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetHierarchyLink {
    pub logical_id: String,
    pub child_asset: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetDeclaration {
    pub asset_name: String,
    pub asset_model_id: String,
    pub asset_properties: Vec<AssetPropertyNotification>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asset_hierarchies: Vec<AssetHierarchyLink>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VesselFleet {
    pub engines: Vec<AssetDeclaration>,
    pub vessel: AssetDeclaration,
}

/// Two engines under one vessel. Engine notifications cover `properties`
/// plus the scores and alarm state; the vessel publishes its total score.
pub fn vessel_fleet(
    id: &str,
    engine_model_id: &str,
    vessel_model_id: &str,
    properties: &[String],
) -> VesselFleet {
    let scores = [
        AVG_SCORE_PROPERTY.replace(' ', ""),
        ASSET_SCORE_PROPERTY.to_string(),
        ALARM_STATE_PROPERTY.to_string(),
    ];
    let engine_properties: Vec<AssetPropertyNotification> = properties
        .iter()
        .chain(scores.iter())
        .map(|p| AssetPropertyNotification::enabled(p))
        .collect();

    let engines: Vec<AssetDeclaration> = (0..2)
        .map(|n| AssetDeclaration {
            asset_name: format!("{}EngineAsset{}", id, n),
            asset_model_id: engine_model_id.to_string(),
            asset_properties: engine_properties.clone(),
            asset_hierarchies: Vec::new(),
        })
        .collect();

    let vessel = AssetDeclaration {
        asset_name: format!("{}VesselAsset", id),
        asset_model_id: vessel_model_id.to_string(),
        asset_properties: vec![AssetPropertyNotification::enabled(
            &TOTAL_SCORE_PROPERTY.replace(' ', ""),
        )],
        asset_hierarchies: engines
            .iter()
            .map(|engine| AssetHierarchyLink {
                logical_id: ENGINE_HIERARCHY.to_string(),
                child_asset: engine.asset_name.clone(),
            })
            .collect(),
    };

    VesselFleet { engines, vessel }
}

/// Tables the pivot view joins
#[derive(Debug, Clone)]
pub struct ViewSource<'a> {
    pub database: &'a str,
    pub data_table: &'a str,
    pub metadata_table: &'a str,
}

/// `CREATE OR REPLACE VIEW` pivoting one asset's sensor values into one
/// column per sensor, per minute, over the recent lookback window.
pub fn pivot_view_sql(view_name: &str, source: &ViewSource, asset_name: &str, sensors: &[String]) -> String {
    let mut sql = format!(
        "CREATE OR REPLACE VIEW {} AS\nSELECT \"date_format\"(\"date_trunc\"('minute', \"timestamp\"), '%Y-%m-%dT%H:%i:%S.%f') \"Timestamp\"\n",
        view_name
    );
    for sensor in sensors {
        sql.push_str(&format!(
            ", CAST(\"max\"((CASE WHEN (\"asset_property_name\" = '{0}') THEN \"asset_property_value\" ELSE null END)) AS double) \"{0}\"\n",
            sensor
        ));
    }
    sql.push_str(&format!(
        "FROM (\nSELECT \"from_unixtime\"((\"time_in_seconds\" + (\"offset_in_nanos\" / 1000000000))) \"timestamp\"\n\
         , \"metadata\".\"asset_name\", \"metadata\".\"asset_property_name\", \"data\".\"asset_property_value\"\n\
         , \"metadata\".\"asset_property_unit\", \"metadata\".\"asset_property_alias\"\n\
         FROM ({db}.{data} data\n\
         INNER JOIN {db}.{meta} metadata ON ((\"data\".\"asset_id\" = \"metadata\".\"asset_id\") AND (\"data\".\"asset_property_id\" = \"metadata\".\"asset_property_id\"))))\n\
         WHERE ((\"timestamp\" > (\"date_trunc\"('minute', current_timestamp) - INTERVAL '{lookback}' MINUTE)) AND (\"asset_name\" = '{asset}')) GROUP BY \"timestamp\"\n",
        db = source.database,
        data = source.data_table,
        meta = source.metadata_table,
        lookback = VIEW_LOOKBACK_MINUTES,
        asset = asset_name.replace('\'', "''"),
    ));
    sql
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DataSchema {
    pub components: Vec<SchemaComponent>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaComponent {
    pub component_name: String,
    pub columns: Vec<SchemaColumn>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "Type")]
    pub column_type: String,
}

/// Lookout for Equipment `InlineDataSchema`, itself a JSON string
pub fn inline_data_schema(component_name: &str, sensors: &[String]) -> Result<String> {
    let mut columns = vec![SchemaColumn {
        name: "Timestamp".to_string(),
        column_type: "DATETIME".to_string(),
    }];
    columns.extend(sensors.iter().map(|s| SchemaColumn {
        name: s.clone(),
        column_type: "DOUBLE".to_string(),
    }));

    Ok(serde_json::to_string(&DataSchema {
        components: vec![SchemaComponent {
            component_name: component_name.to_string(),
            columns,
        }],
    })?)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingWindow {
    pub training_start: String,
    pub training_end: String,
    pub evaluation_start: String,
    pub evaluation_end: String,
}

impl Default for TrainingWindow {
    fn default() -> Self {
        Self {
            training_start: "2019-01-01T00:00:00Z".to_string(),
            training_end: "2019-07-31T00:00:00Z".to_string(),
            evaluation_start: "2019-08-01T00:00:00Z".to_string(),
            evaluation_end: "2019-10-27T00:00:00Z".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingData {
    pub bucket: String,
    pub key_pattern: String,
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct LabelData {
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct InferenceData {
    pub input_bucket: String,
    pub input_prefix: String,
    pub output_bucket: String,
    pub output_prefix: String,
}

/// Input of the dataset/model/scheduler workflow for one asset.
/// `LableData` keeps the spelling the state machine paths expect.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowInput {
    pub name: String,
    pub wait_time: u32,
    pub training_data: TrainingData,
    #[serde(rename = "LableData")]
    pub label_data: LabelData,
    pub inference_data: InferenceData,
    pub inline_data_schema: String,
    pub model_training: TrainingWindow,
}

pub fn workflow_input(
    name: &str,
    bucket: &str,
    asset_id: &str,
    inline_data_schema: String,
    window: TrainingWindow,
) -> WorkflowInput {
    WorkflowInput {
        name: name.to_string(),
        wait_time: WORKFLOW_WAIT_SECONDS,
        training_data: TrainingData {
            bucket: bucket.to_string(),
            key_pattern: "{prefix}/{component_name}/*".to_string(),
            prefix: format!("{}/training-data/", asset_id),
        },
        label_data: LabelData {
            bucket: bucket.to_string(),
            prefix: format!("{}/label-data/", asset_id),
        },
        inference_data: InferenceData {
            input_bucket: bucket.to_string(),
            input_prefix: format!("{}/inference-data/input/", asset_id),
            output_bucket: bucket.to_string(),
            output_prefix: format!("{}/inference-data/output/", asset_id),
        },
        inline_data_schema,
        model_training: window,
    }
}

/// Where one asset's canned history lives
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetDataLocation {
    pub asset_id: String,
    pub asset_data_bucket: String,
    pub asset_data_path: String,
}

/// One ingest invocation per asset and property, assets outermost.
pub fn ingest_fan_out(properties: &[String], assets: &[AssetDataLocation]) -> Vec<IngestRequest> {
    assets
        .iter()
        .flat_map(|asset| {
            properties.iter().map(move |property| IngestRequest {
                asset_id: asset.asset_id.clone(),
                asset_data_bucket: asset.asset_data_bucket.clone(),
                asset_data_path: asset.asset_data_path.clone(),
                property_to_put_data: property.clone(),
            })
        })
        .collect()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRule {
    pub input_property: String,
    pub comparison_operator: String,
    pub threshold: String,
}

pub fn property_value_expression(asset_model_id: &str, property_id: &str) -> String {
    format!(
        "$sitewise.assetModel.`{}`.`{}`.propertyValue.value",
        asset_model_id, property_id
    )
}

pub fn asset_id_expression(asset_model_id: &str, property_id: &str) -> String {
    format!("$sitewise.assetModel.`{}`.`{}`.assetId", asset_model_id, property_id)
}

/// Alarm firing when a property reaches the threshold attribute of the same model
pub fn alarm_rule(asset_model_id: &str, property_id: &str, threshold_property_id: &str) -> AlarmRule {
    AlarmRule {
        input_property: property_value_expression(asset_model_id, property_id),
        comparison_operator: GREATER_OR_EQUAL.to_string(),
        threshold: property_value_expression(asset_model_id, threshold_property_id),
    }
}

/// Resolved ids the alarm model is wired to
#[derive(Debug, Clone)]
pub struct AlarmTarget<'a> {
    pub asset_model_id: &'a str,
    pub property_id: &'a str,
    pub threshold_property_id: &'a str,
    pub state_property_id: &'a str,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRuleDocument {
    pub simple_rule: AlarmRule,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AcknowledgeFlow {
    pub enabled: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializationConfiguration {
    pub disabled_on_initialization: bool,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmCapabilities {
    pub acknowledge_flow: AcknowledgeFlow,
    pub initialization_configuration: InitializationConfiguration,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SiteWiseAlarmAction {
    pub asset_id: String,
    pub property_id: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmAction {
    pub iot_site_wise: SiteWiseAlarmAction,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEventActions {
    pub alarm_actions: Vec<AlarmAction>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmModel {
    pub alarm_model_name: String,
    pub role_arn: String,
    pub alarm_rule: AlarmRuleDocument,
    pub alarm_capabilities: AlarmCapabilities,
    pub alarm_event_actions: AlarmEventActions,
}

/// IoT Events alarm model: active on creation, no acknowledgement, state
/// written back to the asset that raised it. The state property id is a
/// quoted literal in the action, not an expression.
pub fn alarm_model(id: &str, role_arn: &str, target: &AlarmTarget) -> AlarmModel {
    AlarmModel {
        alarm_model_name: format!("{}Alarm", id),
        role_arn: role_arn.to_string(),
        alarm_rule: AlarmRuleDocument {
            simple_rule: alarm_rule(
                target.asset_model_id,
                target.property_id,
                target.threshold_property_id,
            ),
        },
        alarm_capabilities: AlarmCapabilities {
            acknowledge_flow: AcknowledgeFlow { enabled: false },
            initialization_configuration: InitializationConfiguration {
                disabled_on_initialization: false,
            },
        },
        alarm_event_actions: AlarmEventActions {
            alarm_actions: vec![AlarmAction {
                iot_site_wise: SiteWiseAlarmAction {
                    asset_id: asset_id_expression(target.asset_model_id, target.property_id),
                    property_id: format!("'{}'", target.state_property_id),
                },
            }],
        },
    }
}
