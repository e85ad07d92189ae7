//! Active recipe context shared with the tool dispatcher
//!
//! The application is the single writer; the orchestrator only takes
//! snapshots. Cloning the handle shares the same underlying state.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// A recipe as returned by the extraction service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipe {
    pub title: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prep_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cook_time: Option<String>,
}

/// Read-only view of the active recipe and current step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRecipeContext {
    pub title: String,
    pub ingredients: Vec<String>,
    pub instructions: Vec<String>,
    /// 0-based index into `instructions`
    pub current_step: usize,
}

impl ActiveRecipeContext {
    /// Text of the current step, if any
    #[must_use]
    pub fn current_step_text(&self) -> Option<&str> {
        self.instructions.get(self.current_step).map(String::as_str)
    }

    /// Total number of steps
    #[must_use]
    pub fn total_steps(&self) -> usize {
        self.instructions.len()
    }

    /// Render a compact prompt block describing the recipe
    #[must_use]
    pub fn to_prompt_block(&self) -> String {
        let mut out = format!("Recipe: {}\n", self.title);
        if !self.ingredients.is_empty() {
            out.push_str("Ingredients:\n");
            for ingredient in &self.ingredients {
                out.push_str("- ");
                out.push_str(ingredient);
                out.push('\n');
            }
        }
        if !self.instructions.is_empty() {
            out.push_str("Steps:\n");
            for (i, step) in self.instructions.iter().enumerate() {
                out.push_str(&format!("{}. {step}\n", i + 1));
            }
            out.push_str(&format!(
                "The cook is on step {} of {}.\n",
                self.current_step + 1,
                self.total_steps()
            ));
        }
        out
    }
}

#[derive(Debug, Default)]
struct RecipeState {
    recipe: Option<Recipe>,
    step: usize,
}

/// Cloneable handle to the active recipe
#[derive(Debug, Clone, Default)]
pub struct RecipeContext {
    inner: Arc<RwLock<RecipeState>>,
}

impl RecipeContext {
    /// Create an empty context (no active recipe)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `recipe` active, starting at the first step
    pub fn set_recipe(&self, recipe: Recipe) {
        if let Ok(mut state) = self.inner.write() {
            tracing::info!(title = %recipe.title, steps = recipe.instructions.len(), "active recipe set");
            state.recipe = Some(recipe);
            state.step = 0;
        }
    }

    /// Clear the active recipe
    pub fn clear(&self) {
        if let Ok(mut state) = self.inner.write() {
            state.recipe = None;
            state.step = 0;
        }
    }

    /// Advance to the next step; returns the new 0-based index
    pub fn next_step(&self) -> Option<usize> {
        self.update_step(|step, total| (step + 1).min(total.saturating_sub(1)))
    }

    /// Go back one step; returns the new 0-based index
    pub fn previous_step(&self) -> Option<usize> {
        self.update_step(|step, _| step.saturating_sub(1))
    }

    /// Jump to a 0-based step, clamped to the recipe
    pub fn set_step(&self, index: usize) -> Option<usize> {
        self.update_step(|_, total| index.min(total.saturating_sub(1)))
    }

    /// Take a snapshot of the active recipe
    #[must_use]
    pub fn snapshot(&self) -> Option<ActiveRecipeContext> {
        let state = self.inner.read().ok()?;
        let recipe = state.recipe.as_ref()?;
        Some(ActiveRecipeContext {
            title: recipe.title.clone(),
            ingredients: recipe.ingredients.clone(),
            instructions: recipe.instructions.clone(),
            current_step: state.step,
        })
    }

    fn update_step(&self, f: impl FnOnce(usize, usize) -> usize) -> Option<usize> {
        let mut state = self.inner.write().ok()?;
        let total = state.recipe.as_ref()?.instructions.len();
        state.step = f(state.step, total);
        Some(state.step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carbonara() -> Recipe {
        Recipe {
            title: "Carbonara".to_string(),
            ingredients: vec!["spaghetti".to_string(), "guanciale".to_string()],
            instructions: vec![
                "Boil water".to_string(),
                "Cook pasta".to_string(),
                "Toss with sauce".to_string(),
            ],
            servings: None,
            prep_time: None,
            cook_time: None,
        }
    }

    #[test]
    fn empty_context_has_no_snapshot() {
        let ctx = RecipeContext::new();
        assert!(ctx.snapshot().is_none());
        assert!(ctx.next_step().is_none());
    }

    #[test]
    fn steps_are_clamped() {
        let ctx = RecipeContext::new();
        ctx.set_recipe(carbonara());

        assert_eq!(ctx.previous_step(), Some(0));
        assert_eq!(ctx.next_step(), Some(1));
        assert_eq!(ctx.next_step(), Some(2));
        assert_eq!(ctx.next_step(), Some(2));
        assert_eq!(ctx.set_step(10), Some(2));

        let snap = ctx.snapshot().unwrap();
        assert_eq!(snap.current_step_text(), Some("Toss with sauce"));
        assert_eq!(snap.total_steps(), 3);
    }

    #[test]
    fn clones_share_state() {
        let writer = RecipeContext::new();
        let reader = writer.clone();
        writer.set_recipe(carbonara());
        writer.next_step();
        assert_eq!(reader.snapshot().unwrap().current_step, 1);
    }

    #[test]
    fn prompt_block_mentions_step() {
        let ctx = RecipeContext::new();
        ctx.set_recipe(carbonara());
        let block = ctx.snapshot().unwrap().to_prompt_block();
        assert!(block.contains("Recipe: Carbonara"));
        assert!(block.contains("step 1 of 3"));
    }

    #[test]
    fn recipe_deserializes_with_optional_fields() {
        let recipe: Recipe = serde_json::from_str(
            r#"{"title":"Soup","ingredients":["water"],"instructions":["Heat"],"prepTime":"5 min"}"#,
        )
        .unwrap();
        assert_eq!(recipe.prep_time.as_deref(), Some("5 min"));
        assert!(recipe.servings.is_none());
    }
}
