use crate::error::{EmberError, Result};
use crate::plan::{Plan, PlanDraft, Priority, Step};
use crate::request::{normalize_text, Request, Urgency};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateStep {
    pub description: String,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub estimated_minutes: u32,
}

impl TemplateStep {
    fn new(description: &str, minutes: u32, equipment: &[&str], warnings: &[&str]) -> Self {
        Self {
            description: description.to_string(),
            equipment: equipment.iter().map(|s| s.to_string()).collect(),
            warnings: warnings.iter().map(|s| s.to_string()).collect(),
            estimated_minutes: minutes,
        }
    }
}

/// A static plan keyed by category and/or urgency. `title` may contain
/// `{category}` and `{urgency}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    pub steps: Vec<TemplateStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_minutes: Option<u32>,
}

impl FallbackTemplate {
    fn matches_category(&self, category: &str) -> bool {
        self.category
            .as_deref()
            .is_some_and(|c| normalize_text(c) == category)
    }

    fn problems(&self, label: &str) -> Vec<String> {
        let mut problems = Vec::new();
        if self.title.trim().is_empty() {
            problems.push(format!("{}: title must not be blank", label));
        }
        if self.steps.iter().all(|s| s.description.trim().is_empty()) {
            problems.push(format!("{}: at least one step is required", label));
        }
        problems
    }
}

#[derive(Debug, Deserialize)]
struct CatalogSpec {
    #[serde(default)]
    default: Option<FallbackTemplate>,
    #[serde(default)]
    templates: Vec<FallbackTemplate>,
}

/// Deterministic plans served when generation is unavailable.
///
/// Every template is checked on construction, so rendering a plan from a
/// catalog cannot fail on template content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "CatalogSpec")]
pub struct FallbackCatalog {
    default: FallbackTemplate,
    templates: Vec<FallbackTemplate>,
}

impl TryFrom<CatalogSpec> for FallbackCatalog {
    type Error = EmberError;

    fn try_from(spec: CatalogSpec) -> Result<Self> {
        let default = spec.default.unwrap_or_else(builtin_default);
        FallbackCatalog::new(default, spec.templates)
    }
}

impl Default for FallbackCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FallbackCatalog {
    pub fn new(default: FallbackTemplate, templates: Vec<FallbackTemplate>) -> Result<Self> {
        let catalog = Self { default, templates };
        let problems = catalog.validate();
        if problems.is_empty() {
            Ok(catalog)
        } else {
            Err(EmberError::Validation(problems.join("; ")))
        }
    }

    /// Generic fire response plus an electrical variant and an immediate
    /// evacuation plan for critical requests.
    pub fn builtin() -> Self {
        Self {
            default: builtin_default(),
            templates: vec![
                FallbackTemplate {
                    category: Some("appliance".into()),
                    urgency: None,
                    title: "Electrical fire response ({urgency} priority)".into(),
                    priority: None,
                    steps: vec![
                        TemplateStep::new(
                            "Raise the alarm and move everyone away from the appliance",
                            3,
                            &["Fire alarm"],
                            &["Do not approach sparking equipment"],
                        ),
                        TemplateStep::new(
                            "Cut power at the breaker or main switch",
                            2,
                            &["Insulated gloves"],
                            &["Never use water on an energized appliance"],
                        ),
                        TemplateStep::new(
                            "Extinguish with a CO2 or dry powder extinguisher",
                            10,
                            &["CO2 extinguisher", "Dry powder extinguisher"],
                            &["Keep the exit behind you"],
                        ),
                        TemplateStep::new(
                            "Ventilate and check for smouldering insulation",
                            15,
                            &["Thermal camera"],
                            &["Do not restore power until inspected"],
                        ),
                    ],
                    total_minutes: None,
                },
                FallbackTemplate {
                    category: None,
                    urgency: Some(Urgency::Critical),
                    title: "Immediate evacuation: {category}".into(),
                    priority: Some(Priority::Critical),
                    steps: vec![
                        TemplateStep::new(
                            "Evacuate everyone immediately and call the fire brigade",
                            3,
                            &["Phone"],
                            &["Do not attempt to fight the fire", "Close doors behind you"],
                        ),
                        TemplateStep::new(
                            "Account for all occupants at the assembly point",
                            5,
                            &[],
                            &["Never re-enter the building"],
                        ),
                    ],
                    total_minutes: None,
                },
            ],
        }
    }

    pub fn with_template(mut self, template: FallbackTemplate) -> Result<Self> {
        self.templates.push(template);
        let problems = self.validate();
        if problems.is_empty() {
            Ok(self)
        } else {
            Err(EmberError::Validation(problems.join("; ")))
        }
    }

    pub fn templates(&self) -> &[FallbackTemplate] {
        &self.templates
    }

    pub fn validate(&self) -> Vec<String> {
        let mut problems = self.default.problems("default template");
        for (i, template) in self.templates.iter().enumerate() {
            problems.extend(template.problems(&format!("template {}", i)));
            if template.category.is_none() && template.urgency.is_none() {
                problems.push(format!("template {}: needs a category or an urgency", i));
            }
        }
        problems
    }

    /// Lookup order: exact (category, urgency) for the first entry category
    /// that has one, then category only, then urgency only, then the default.
    pub fn select(&self, request: &Request) -> (&FallbackTemplate, Option<String>) {
        let categories = request.categories();
        let urgency = request.urgency;

        for category in &categories {
            if let Some(t) = self
                .templates
                .iter()
                .find(|t| t.matches_category(category) && t.urgency == Some(urgency))
            {
                return (t, Some(category.clone()));
            }
        }
        for category in &categories {
            if let Some(t) = self
                .templates
                .iter()
                .find(|t| t.matches_category(category) && t.urgency.is_none())
            {
                return (t, Some(category.clone()));
            }
        }
        if let Some(t) = self
            .templates
            .iter()
            .find(|t| t.category.is_none() && t.urgency == Some(urgency))
        {
            return (t, None);
        }
        (&self.default, None)
    }

    /// Build the degraded plan for `request`. A template that fails to build
    /// yields to the catalog default, then to [`Plan::evacuate`].
    pub fn render(&self, request: &Request) -> Plan {
        let (template, matched) = self.select(request);
        let rendered = render_template(template, matched.clone(), request).or_else(|e| {
            log::error!("fallback template '{}' failed to render: {}", template.title, e);
            render_template(&self.default, matched, request)
        });
        match rendered {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("default fallback template failed to render: {}", e);
                Plan::evacuate(request.urgency.into())
            }
        }
    }
}

fn render_template(
    template: &FallbackTemplate,
    matched: Option<String>,
    request: &Request,
) -> Result<Plan> {
    let category = matched
        .or_else(|| request.categories().into_iter().next())
        .unwrap_or_default();
    let title = template
        .title
        .replace("{category}", &category)
        .replace("{urgency}", request.urgency.as_str());

    let steps = template.steps.iter().map(|s| {
        Step::new(s.description.clone(), s.estimated_minutes)
            .with_equipment(s.equipment.iter().cloned())
            .with_warnings(s.warnings.iter().cloned())
    });
    let mut draft = PlanDraft::new(title, template.priority.unwrap_or(request.urgency.into()))
        .steps(steps)
        .degraded(true);
    if let Some(total) = template.total_minutes {
        draft = draft.duration_override(total);
    }
    draft.build()
}

fn builtin_default() -> FallbackTemplate {
    FallbackTemplate {
        category: None,
        urgency: None,
        title: "Fire emergency response plan".into(),
        priority: None,
        steps: vec![
            TemplateStep::new(
                "Raise the alarm and evacuate everyone from the danger area",
                5,
                &["Fire alarm", "Emergency lighting"],
                &["Stay low to avoid smoke", "Do not use lifts"],
            ),
            TemplateStep::new(
                "Assess the fire: size, fuel and spread",
                10,
                &["Protective clothing", "Breathing apparatus"],
                &["Watch for structural collapse"],
            ),
            TemplateStep::new(
                "Extinguish using equipment suited to the fuel",
                20,
                &["Fire extinguisher", "Fire hose"],
                &["Match the extinguisher to the fire class", "Keep an exit route open"],
            ),
            TemplateStep::new(
                "Confirm the fire is out and inspect for hot spots",
                15,
                &["Thermal camera"],
                &["Watch for re-ignition"],
            ),
        ],
        total_minutes: None,
    }
}
