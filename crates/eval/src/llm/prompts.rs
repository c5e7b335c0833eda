use crate::error::ClassificationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const CLASSIFY_DIRECT: &str = "classify_direct";
pub const CLASSIFY_WITH_CONTEXT: &str = "classify_with_context";
pub const DESCRIBE_REENTRANT: &str = "describe_reentrant";
pub const DESCRIBE_SAFE: &str = "describe_safe";
pub const DESCRIBE_GENERAL: &str = "describe_general";
pub const COT_TRIAGE: &str = "cot_triage";
pub const COT_FUNCTION: &str = "cot_function";
pub const COT_CROSS_FUNCTION: &str = "cot_cross_function";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub name: String,
    pub system_prompt: String,
    pub user_prompt_template: String,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: String::new(),
            user_prompt_template: String::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_user_template(mut self, template: impl Into<String>) -> Self {
        self.user_prompt_template = template.into();
        self
    }
}

pub struct PromptBuilder {
    templates: HashMap<String, PromptTemplate>,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            templates: HashMap::new(),
        };

        builder.load_default_templates();
        builder
    }

    fn load_default_templates(&mut self) {
        self.add_template(Self::classify_direct_template());
        self.add_template(Self::classify_with_context_template());

        self.add_template(Self::describe_reentrant_template());
        self.add_template(Self::describe_safe_template());
        self.add_template(Self::describe_general_template());

        self.add_template(Self::cot_triage_template());
        self.add_template(Self::cot_function_template());
        self.add_template(Self::cot_cross_function_template());
    }

    /// Replaces any template registered under the same name.
    pub fn add_template(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn build_prompt(
        &self,
        template_name: &str,
        variables: &HashMap<&str, String>,
    ) -> Result<(String, String), ClassificationError> {
        let template = self.templates.get(template_name).ok_or_else(|| {
            ClassificationError::Prompt(format!("Template '{}' not found", template_name))
        })?;

        let system_prompt = substitute_variables(&template.system_prompt, variables);
        let user_prompt = substitute_variables(&template.user_prompt_template, variables);

        Ok((system_prompt, user_prompt))
    }

    fn classify_direct_template() -> PromptTemplate {
        PromptTemplate::new(CLASSIFY_DIRECT)
            .with_system_prompt(format!(
                "{}{}",
                DIRECT_SYSTEM_PROMPT, CLASSIFICATION_PRINCIPLES
            ))
            .with_user_template(format!("{}{}", DIRECT_USER_TEMPLATE, CLASSIFICATION_OUTPUT))
    }

    fn classify_with_context_template() -> PromptTemplate {
        PromptTemplate::new(CLASSIFY_WITH_CONTEXT)
            .with_system_prompt(format!(
                "{}{}",
                WITH_CONTEXT_SYSTEM_PROMPT, CLASSIFICATION_PRINCIPLES
            ))
            .with_user_template(format!(
                "{}{}",
                WITH_CONTEXT_USER_TEMPLATE, CLASSIFICATION_OUTPUT
            ))
    }

    fn describe_reentrant_template() -> PromptTemplate {
        PromptTemplate::new(DESCRIBE_REENTRANT)
            .with_system_prompt(DESCRIBE_REENTRANT_SYSTEM_PROMPT)
            .with_user_template(DESCRIBE_REENTRANT_USER_TEMPLATE)
    }

    fn describe_safe_template() -> PromptTemplate {
        PromptTemplate::new(DESCRIBE_SAFE)
            .with_system_prompt(DESCRIBE_SAFE_SYSTEM_PROMPT)
            .with_user_template(DESCRIBE_SAFE_USER_TEMPLATE)
    }

    fn describe_general_template() -> PromptTemplate {
        PromptTemplate::new(DESCRIBE_GENERAL)
            .with_system_prompt(DESCRIBE_GENERAL_SYSTEM_PROMPT)
            .with_user_template(DESCRIBE_GENERAL_USER_TEMPLATE)
    }

    fn cot_triage_template() -> PromptTemplate {
        PromptTemplate::new(COT_TRIAGE)
            .with_system_prompt(COT_TRIAGE_SYSTEM_PROMPT)
            .with_user_template(COT_TRIAGE_USER_TEMPLATE)
    }

    fn cot_function_template() -> PromptTemplate {
        PromptTemplate::new(COT_FUNCTION)
            .with_system_prompt(COT_FUNCTION_SYSTEM_PROMPT)
            .with_user_template(COT_FUNCTION_USER_TEMPLATE)
    }

    fn cot_cross_function_template() -> PromptTemplate {
        PromptTemplate::new(COT_CROSS_FUNCTION)
            .with_system_prompt(COT_CROSS_FUNCTION_SYSTEM_PROMPT)
            .with_user_template(COT_CROSS_FUNCTION_USER_TEMPLATE)
    }
}

/// Single left-to-right pass: a `{name}` placeholder is replaced only when `name` is a
/// known variable, and substituted text is never rescanned. Contract source that
/// happens to contain `{...}` is therefore left intact.
fn substitute_variables(template: &str, variables: &HashMap<&str, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let replaced = after.find('}').and_then(|close| {
            let key = &after[..close];
            let is_ident = !key.is_empty()
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if is_ident {
                variables.get(key).map(|value| (value, close))
            } else {
                None
            }
        });

        match replaced {
            Some((value, close)) => {
                result.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                result.push('{');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

const DIRECT_SYSTEM_PROMPT: &str = r#"You are an expert Solidity smart contract security auditor performing a precise reentrancy analysis. Identify reentrancy patterns that are actually exploitable, and avoid false positives by recognizing mitigations that work.
"#;

const WITH_CONTEXT_SYSTEM_PROMPT: &str = r#"You are an expert blockchain security auditor specializing in reentrancy. You classify the reentrancy risk of an input contract, using security analyses of previously audited similar contracts as reference examples of safe and unsafe patterns.
"#;

const CLASSIFICATION_PRINCIPLES: &str = r#"
Apply these principles:
1. Strict CEI adherence: when every state change (effect) of an operation is unconditionally completed before any external call (interaction) on that path, that path is strongly indicated safe.
2. Effective reentrancy guards: a correctly applied guard (OpenZeppelin `nonReentrant`, a custom mutex) protects the function from re-entering itself.
3. Plausible exploit path: "Reentrant" requires a plausible scenario where re-entry causes a tangible harm (fund theft, critical state corruption, broken logic). Theoretical patterns with standard mitigations in place do not qualify.
4. Cross-function reentrancy must be a concrete risk: an external call in `funcA` matters only if `funcB` can be re-entered to exploit state `funcA` has left inconsistent, and `funcB` is not itself protected.
5. `delegatecall` scrutiny: delegatecall into untrusted or externally controlled code is high risk; judge which state is reachable on re-entry.

Classify as Reentrant only when an exploit path exists and is not mitigated by correct CEI ordering, guards, or other clear protective logic. This covers state modified after an exploitable external call, a missing or flawed guard on a re-enterable function, a credible cross-function path over shared state, and exploitable delegatecall into a potentially malicious contract.
Classify as Safe when all external interactions follow CEI, guards are applied where needed, cross-function paths are blocked, and any delegatecall targets trusted code. If a pattern looks suspicious but a standard mitigation is correctly applied, prefer Safe and name the mitigation.
The classification MUST be exactly 'Reentrant' or 'Safe'.
"#;

const CLASSIFICATION_OUTPUT: &str = r#"
### Output
Respond with a single JSON object:
{"classification": "Reentrant" | "Safe", "explanation": "<escaped JSON string>"}

The explanation MUST be a valid JSON string with quotes and newlines escaped. Shape its inner structure to the findings (for example `mitigation_found_but_flawed`, `cross_function_scenario_details`).
- If Reentrant: name the vulnerable function(s), cite line numbers of the external call and the state modifications, describe the concrete attack vector, and explain why any present mitigation fails.
- If Safe: name the functions that make external calls or change relevant state, explain the safeguard that prevents reentrancy, and cite the line numbers that demonstrate it.
"#;

const DIRECT_USER_TEMPLATE: &str = r#"### Input Contract
```solidity
{contract_source}
```
"#;

const WITH_CONTEXT_USER_TEMPLATE: &str = r#"### Input Contract
```solidity
{contract_source}
```

### Security Analysis of Similar Contracts
{similar_contexts}
---
Compare the input contract against these examples, then classify it.
"#;

const DESCRIBE_REENTRANT_SYSTEM_PROMPT: &str = r#"You are a smart contract security auditor documenting a critical vulnerability. Write a precise, actionable vulnerability report for a contract known to be reentrant."#;

const DESCRIBE_REENTRANT_USER_TEMPLATE: &str = r#"### Input Contract (known vulnerable)
```solidity
{similar_source_code}
```

1. Pinpoint the vulnerability: the exact function and line of the external call that happens before a state update.
2. Describe the attack step by step, including how the attacker's contract interacts with this one.
3. Remediation: explain how the code breaks the Checks-Effects-Interactions pattern and give the code change that fixes it.
"#;

const DESCRIBE_SAFE_SYSTEM_PROMPT: &str = r#"You are a smart contract security educator. Write a clear, concise analysis of a contract known to be safe from reentrancy, suitable for teaching secure patterns."#;

const DESCRIBE_SAFE_USER_TEMPLATE: &str = r#"### Input Contract (known safe)
```solidity
{similar_source_code}
```

1. Identify the primary pattern that prevents reentrancy (Checks-Effects-Interactions, reentrancy guard, ...).
2. Walk through the relevant function(s) and explain how the order of operations blocks a reentrancy attack.
3. Cite the line numbers critical to the mechanism.
"#;

const DESCRIBE_GENERAL_SYSTEM_PROMPT: &str =
    r#"You are an expert in smart contract security. Analyze a Solidity contract for reentrancy."#;

const DESCRIBE_GENERAL_USER_TEMPLATE: &str = r#"If reentrancy exists, identify the affected lines or patterns and explain the attack vector.
If the contract appears secure, justify why and highlight the practices that prevent reentrancy.

```solidity
{similar_source_code}
```
"#;

const COT_TRIAGE_SYSTEM_PROMPT: &str = r#"You are a code analysis bot. Your only task is to list the functions of a Solidity contract that contain an external call: `.call`, `.delegatecall`, `.staticcall`, `.send` or `.transfer`."#;

const COT_TRIAGE_USER_TEMPLATE: &str = r#"### Input Contract
```solidity
{contract_source}
```

Respond ONLY with a JSON object with the single key "functions_to_analyze", an array holding the name of every function that contains an external call:
{"functions_to_analyze": ["withdraw", "..."]}
"#;

const COT_FUNCTION_SYSTEM_PROMPT: &str = r#"You are an expert Solidity smart contract security auditor. You analyze a SINGLE function of a larger contract for reentrancy.
1. Checks-Effects-Interactions: are all state changes completed before the external call?
2. Reentrancy guards: is the function protected by an effective guard such as `nonReentrant`?
3. Plausible exploit path: in isolation, could re-entering this function cause harm?"#;

const COT_FUNCTION_USER_TEMPLATE: &str = r#"Analyze the function `{function_name}` in the context of the full contract.

### Full Contract Source
```solidity
{contract_source}
```
{function_context}
Respond with a single JSON object:
{
  "function_name": "{function_name}",
  "analysis": {
    "has_external_call": true/false,
    "follows_cei_pattern": true/false,
    "has_reentrancy_guard": true/false,
    "is_vulnerable_in_isolation": true/false,
    "reasoning": "Brief justification citing the line numbers of the external call and the state changes."
  }
}
"#;

const COT_CROSS_FUNCTION_SYSTEM_PROMPT: &str = r#"You are an expert security auditor specializing in multi-step exploits. A cross-function reentrancy attack exists when an external call in `function_A` lets an attacker re-enter the contract and call `function_B` before `function_A` finishes, and `function_B` manipulates state that `function_A` still relies on."#;

const COT_CROSS_FUNCTION_USER_TEMPLATE: &str = r#"### Full Contract Source
```solidity
{contract_source}
```

### Individual Function Analyses
```json
{analyses_json}
```

Using the contract and the per-function analyses, decide whether any plausible cross-function reentrancy path exists. Respond with a single JSON object:
{
  "cross_function_analysis": {
    "is_exploitable": true/false,
    "exploit_scenario": "Step-by-step attack path naming the entry function and the re-entered function, or 'No plausible cross-function reentrancy paths were identified.'"
  }
}
"#;
