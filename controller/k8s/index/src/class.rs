//! Ingress-class scoping.

use manba_ingress_controller_k8s_api::INGRESS_CLASS_ANNOTATION;
use std::collections::BTreeMap;

/// The class assumed when objects carry no annotation.
pub const DEFAULT_INGRESS_CLASS: &str = "manba";

/// Decides whether an object belongs to this controller.
#[derive(Clone, Debug)]
pub struct IngressClass(String);

impl IngressClass {
    pub fn new(class: impl Into<String>) -> Self {
        let class = class.into();
        if class.is_empty() {
            return Self(DEFAULT_INGRESS_CLASS.to_string());
        }
        Self(class)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Two combinations are valid: the annotation names this class, or the
    /// annotation is absent and this controller runs the default class.
    pub fn accepts(&self, annotations: Option<&BTreeMap<String, String>>) -> bool {
        let value = annotations
            .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
            .map(String::as_str)
            .unwrap_or("");
        if value.is_empty() && self.0 == DEFAULT_INGRESS_CLASS {
            return true;
        }
        value == self.0
    }
}
