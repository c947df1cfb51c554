use std::path::PathBuf;

use foundry_compilers::{
    artifacts::{Error, Source, Sources},
    CompilerInput, Solc,
};
use libexo_core::{error::ExoError, types::Bytes};
use tracing::{debug, error};

const SOURCE_NAME: &str = "code.sol";

/// Compile a solidity string.
/// Return a list of (contract name, deployment bytecode) pairs.
/// The requested solc version is installed through svm if missing.
pub fn compile_contract(
    solidity_version: &str,
    contract_code: impl ToString,
) -> Result<Vec<(String, Bytes)>, ExoError> {
    // prepare compiler input
    let compiler = Solc::find_or_install_svm_version(solidity_version)
        .map_err(|e| {
            ExoError::Custom(format!(
                "solc {} not available: {}",
                solidity_version, e
            ))
        })?;
    let version = compiler.version().map_err(|e| {
        ExoError::Custom(format!("failed to get solc version: {}", e))
    })?;
    let source = Source::new(contract_code.to_string());
    let mut sources = Sources::new();
    sources.insert(PathBuf::from(SOURCE_NAME), source);
    let compiler_input = CompilerInput::with_sources(sources)
        .remove(0)
        .normalize_evm_version(&version);

    // compile
    debug!(version = %version, "compiling solidity source");
    let compiler_output =
        compiler.compile_exact(&compiler_input).map_err(|e| {
            ExoError::Custom(format!("failed to compile contract code: {}", e))
        })?;
    let errs: Vec<Error> = compiler_output
        .errors
        .iter()
        .filter(|e| e.severity.is_error())
        .map(|e| e.to_owned())
        .collect();
    if !errs.is_empty() {
        error!(errors = errs.len(), "failed to compile solidity code");
        let msg = errs
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        return Err(ExoError::Custom(format!(
            "failed to compile solidity code: {}",
            msg
        )));
    }

    let mut contracts = Vec::new();
    let Some(file) = compiler_output.contracts.get(SOURCE_NAME) else {
        return Ok(contracts);
    };
    for (name, contract) in file {
        let bytecode = contract
            .evm
            .to_owned()
            .and_then(|evm| evm.bytecode)
            .and_then(|b| b.object.into_bytes())
            .ok_or(ExoError::NotFound(format!(
                "bytecode of contract {}",
                name
            )))?;
        contracts.push((name.clone(), Bytes::from(bytecode.to_vec())));
    }
    Ok(contracts)
}

/// Compile a solidity string and return the bytecode of the named contract.
pub fn compile_named_contract(
    solidity_version: &str,
    contract_code: impl ToString,
    contract_name: &str,
) -> Result<Bytes, ExoError> {
    compile_contract(solidity_version, contract_code)?
        .into_iter()
        .find(|(n, _)| n == contract_name)
        .map(|(_, bytecode)| bytecode)
        .ok_or(ExoError::NotFound(format!(
            "no contract named {} found",
            contract_name
        )))
}
