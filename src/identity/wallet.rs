/// Wallet identity seam. Key custody lives with the wallet application; the
/// trade protocol only needs a stable public address for the current user,
/// and rejects actions locally when none is available.
pub trait WalletIdentity: Send + Sync {
    fn current_address(&self) -> Option<String>;
}

/// Identity pinned from configuration, for daemon and observer deployments.
#[derive(Debug, Clone, Default)]
pub struct ConfigWallet {
    address: Option<String>,
}

impl ConfigWallet {
    pub fn new(address: Option<String>) -> Self {
        let address = address.filter(|a| !a.trim().is_empty());
        Self { address }
    }
}

impl WalletIdentity for ConfigWallet {
    fn current_address(&self) -> Option<String> {
        self.address.clone()
    }
}
