// Vulnerability Lookup
// Attach advisories from the vulnerability index to discovered packages

use crate::error::StepError;
use crate::execution::context::StepContext;

/// Look up every discovered package in the vulnerability index
pub fn find_vulnerabilities(ctx: &StepContext) -> Result<(), StepError> {
    let index = ctx
        .services()
        .vulnerability_index
        .clone()
        .ok_or_else(|| StepError::defect("vulnerability index is not configured"))?;
    let scope = ctx.scope();
    let mut vulnerable = 0;

    for package in scope.packages() {
        let found = index.vulnerabilities_for(&package.purl())?;
        if !found.is_empty() {
            vulnerable += 1;
        }
        scope.modify_package(package.uuid, |p| p.affected_by_vulnerabilities = found)?;
    }

    ctx.log(format!("{} vulnerable packages found", vulnerable));
    Ok(())
}
