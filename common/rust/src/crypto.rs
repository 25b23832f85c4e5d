use ethers::types::{Address, H256};
use sha3::{Keccak256, Digest};

use crate::types::DeployerIdentity;

pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256::from_slice(&hasher.finalize())
}

/// CREATE2 address for `init_code` deployed by `deployer`:
/// `keccak256(0xff ++ factory ++ salt ++ keccak256(init_code))[12..]`.
///
/// Depends only on its arguments, so the same contract resolves to the same
/// address on every chain where the factory lives at the same address.
pub fn create2_address(deployer: &DeployerIdentity, init_code: &[u8]) -> Address {
    let code_hash = keccak256(init_code);

    let mut hasher = Keccak256::new();
    hasher.update([0xffu8]);
    hasher.update(deployer.factory.as_bytes());
    hasher.update(deployer.salt.as_bytes());
    hasher.update(code_hash.as_bytes());
    let hash = hasher.finalize();

    Address::from_slice(&hash[12..])
}

/// Calldata understood by the deterministic-deployment proxy: the salt
/// followed by the init code.
pub fn create2_deploy_calldata(deployer: &DeployerIdentity, init_code: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(32 + init_code.len());
    data.extend_from_slice(deployer.salt.as_bytes());
    data.extend_from_slice(init_code);
    data
}
