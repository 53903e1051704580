/// Top-level wallet
///
/// Owns the file storage, the decrypted-data container, the root asset,
/// the address accounts and the metadata accounts. Single-key wallets are
/// created from a seed, a raw Armory-135 root, a Base58 extended key, or
/// a public root (watching-only); the multisig kind aggregates single
/// wallets for the resolver surface.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bitcoin::base58;
use tracing::info;

use crate::crypto::hash::{hash160, hash256, hmac_sha256};
use crate::crypto::{ecc, KdfRomix, SecretBytes};
use crate::encryption::{
    Cipher, CipherData, ContainerLock, DecryptedDataContainer, EncryptedSeed, PassphrasePrompt,
};
use crate::error::{
    AccountError, EncryptionError, ResolverError, SerializationError, WalletError, WalletResult,
};
use crate::storage::{DbTree, WalletStorage};
use crate::util::{BinaryReader, BinaryWriter, ReentrantLock};
use crate::wallet::address::{
    address_string_to_prefixed_hash, AddressEntry, AddressType,
};
use crate::wallet::address_account::{AccountKind, AccountRoot, AddressAccount, ADDRESS_ACCOUNT_PREFIX};
use crate::wallet::asset::{AssetEntry, AssetId, ROOT_ASSET_INDEX};
use crate::wallet::bip32::Bip32Node;
use crate::wallet::metadata::{
    MetaAccount, MetaAccountKind, MetaAsset, PeerProjection, META_ACCOUNT_PREFIX,
};

pub const WALLETMETA_PREFIX: u8 = 0xB0;
pub const WALLETTYPE_KEY: u8 = 0x01;
pub const PARENTID_KEY: u8 = 0x02;
pub const WALLETID_KEY: u8 = 0x03;
pub const ROOTASSET_KEY: u8 = 0x07;
pub const MAIN_ACCOUNT_KEY: u8 = 0x08;
pub const WALLET_SEED_KEY: u8 = 0x09;
pub const MASTERID_KEY: u8 = 0xA0;
pub const MAINWALLET_KEY: u8 = 0xA1;

pub const WALLET_TYPE_SINGLE: u32 = 0x0000_0001;
pub const WALLET_TYPE_MULTISIG: u32 = 0x0000_0002;

const WALLET_VERSION: (u8, u8, u8) = (1, 0, 0);

/// Password metadata entry kinds.
pub const PASSWORD_TYPE_PASSPHRASE: u8 = 0x01;
pub const PASSWORD_TYPE_DEFAULT_KEY: u8 = 0x02;

/// The wallet root asset sits outside any account.
fn wallet_root_asset_id() -> AssetId {
    AssetId::new(u32::MAX, u32::MAX, ROOT_ASSET_INDEX)
}

/// Store-wide wallet metadata, kept in the headers sub-DB.
#[derive(Clone, Debug)]
pub struct WalletMeta {
    pub wallet_type: u32,
    pub version: (u8, u8, u8),
    pub default_key: Vec<u8>,
    pub default_kdf_id: Vec<u8>,
    pub master_key_id: Vec<u8>,
    pub passwords: Vec<(u8, Vec<u8>)>,
}

impl WalletMeta {
    pub fn serialize(&self) -> Vec<u8> {
        let mut bw = BinaryWriter::new();
        bw.put_u32_le(self.wallet_type);
        bw.put_u8(self.version.0);
        bw.put_u8(self.version.1);
        bw.put_u8(self.version.2);
        bw.put_var_bytes(&self.default_key);
        bw.put_var_bytes(&self.default_kdf_id);
        bw.put_var_bytes(&self.master_key_id);
        bw.put_var_int(self.passwords.len() as u64);
        for (kind, key_id) in &self.passwords {
            bw.put_u8(*kind);
            bw.put_var_bytes(key_id);
        }
        bw.into_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, SerializationError> {
        let mut br = BinaryReader::new(data);
        let wallet_type = br.get_u32_le()?;
        let version = (br.get_u8()?, br.get_u8()?, br.get_u8()?);
        let default_key = br.get_var_bytes()?;
        let default_kdf_id = br.get_var_bytes()?;
        let master_key_id = br.get_var_bytes()?;
        let count = br.get_var_int()? as usize;
        let mut passwords = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = br.get_u8()?;
            passwords.push((kind, br.get_var_bytes()?));
        }
        Ok(Self {
            wallet_type,
            version,
            default_key,
            default_kdf_id,
            master_key_id,
            passwords,
        })
    }
}

/// Knobs for wallet creation.
pub struct CreateParams {
    pub passphrase: Option<SecretBytes>,
    pub lookup: u32,
    /// Override the calibrated default, mainly for fast test wallets.
    pub kdf: Option<KdfRomix>,
}

impl Default for CreateParams {
    fn default() -> Self {
        Self {
            passphrase: None,
            lookup: crate::wallet::asset_account::DEFAULT_LOOKUP,
            kdf: None,
        }
    }
}

pub struct Wallet {
    storage: WalletStorage,
    headers: DbTree,
    tree: DbTree,
    wallet_id: String,
    parent_id: String,
    main_account: u32,
    accounts: BTreeMap<u32, AddressAccount>,
    meta_accounts: BTreeMap<u32, MetaAccount>,
    root: Option<AssetEntry>,
    seed: Option<EncryptedSeed>,
    container: DecryptedDataContainer,
    meta: WalletMeta,
    lock: Arc<ReentrantLock>,
}

/// Wallet id for BIP-32 roots: hash160 of the root public key with the
/// scheme tag XORed in, truncated to six bytes and Base58-encoded.
fn wallet_id_from_bip32(node: &Bip32Node) -> WalletResult<String> {
    let mut pubkey = ecc::uncompress_point(node.pubkey())?;
    pubkey[0] ^= 0x01;
    let digest = hash160(&pubkey);
    Ok(base58::encode(&digest[..6]))
}

/// Wallet id for Armory-135 roots: walk the public chain one step and
/// hash that first derived key.
fn wallet_id_from_armory_root(pubkey: &[u8], chaincode: &[u8]) -> WalletResult<String> {
    let digest = hash256(pubkey);
    let scalar: Vec<u8> = chaincode
        .iter()
        .zip(digest.iter())
        .map(|(a, b)| a ^ b)
        .collect();
    let first_derived = ecc::point_tweak_mul(pubkey, &scalar)?;
    let digest = hash160(&first_derived);
    Ok(base58::encode(&digest[..6]))
}

/// Armory-135 chaincode when none is supplied: deterministic from the
/// root key so old backups remain recoverable.
fn chaincode_from_root_key(privkey: &SecretBytes) -> SecretBytes {
    let digest = hash256(privkey.as_slice());
    SecretBytes::new(hmac_sha256(&digest, b"Derive Chaincode from Root Key").to_vec())
}

struct Scaffold {
    storage: WalletStorage,
    headers: DbTree,
    tree: DbTree,
    container: DecryptedDataContainer,
    kdf: KdfRomix,
    default_key: SecretBytes,
}

fn scaffold(path: &Path, wallet_id: &str, kdf: Option<KdfRomix>) -> WalletResult<Scaffold> {
    let storage = WalletStorage::create(path)?;
    let headers = storage.headers()?;
    let tree = storage.open_tree(wallet_id)?;
    let default_key = SecretBytes::random(32)?;
    let container = DecryptedDataContainer::new(headers.clone(), default_key.clone());
    let kdf = match kdf {
        Some(kdf) => kdf,
        None => KdfRomix::new()?,
    };
    Ok(Scaffold {
        storage,
        headers,
        tree,
        container,
        kdf,
        default_key,
    })
}

impl Wallet {
    /// Create a wallet from a 32-byte seed: BIP-32 root, legacy and segwit
    /// accounts, segwit main, seed stored encrypted.
    pub fn create_from_seed(path: &Path, seed: &[u8], params: CreateParams) -> WalletResult<Self> {
        let node = Bip32Node::from_seed(seed)?;
        let wallet_id = wallet_id_from_bip32(&node)?;
        let sc = scaffold(path, &wallet_id, params.kdf)?;

        let scope = sc.container.unlock();
        let (master_id, wrap_id) =
            sc.container
                .setup_master_key(&scope, &sc.kdf, params.passphrase.as_ref())?;
        let cipher_template = Cipher::new(sc.kdf.id(), master_id.clone())?;

        // Root asset and encrypted seed record.
        let root = build_wallet_root(&node, &sc.container, &scope, Some(&cipher_template))?;
        let seed_cipher = cipher_template.for_new_plaintext()?;
        let seed_ct = sc.container.encrypt_data(&scope, &seed_cipher, seed)?;
        let seed_record = EncryptedSeed {
            data: CipherData::new(seed_ct, seed_cipher),
        };
        sc.tree
            .put(&[WALLET_SEED_KEY], &seed_record.serialize())?;

        let mut accounts = BTreeMap::new();
        let legacy = AddressAccount::make_new(
            &AccountKind::Bip32Legacy,
            &AccountRoot::Bip32(&node),
            &sc.container,
            &scope,
            &sc.tree,
            Some(&cipher_template),
            params.lookup,
        )?;
        let segwit = AddressAccount::make_new(
            &AccountKind::Bip32SegWit,
            &AccountRoot::Bip32(&node),
            &sc.container,
            &scope,
            &sc.tree,
            Some(&cipher_template),
            params.lookup,
        )?;
        let main_account = segwit.id();
        accounts.insert(legacy.id(), legacy);
        accounts.insert(segwit.id(), segwit);
        drop(scope);

        let password_kind = if params.passphrase.is_some() {
            PASSWORD_TYPE_PASSPHRASE
        } else {
            PASSWORD_TYPE_DEFAULT_KEY
        };
        finish_creation(
            sc,
            wallet_id,
            main_account,
            accounts,
            Some(root),
            Some(seed_record),
            master_id,
            vec![(password_kind, wrap_id)],
        )
    }

    /// Create a legacy Armory-135 wallet from a raw private root.
    pub fn create_from_private_root_armory135(
        path: &Path,
        priv_root: SecretBytes,
        chaincode: Option<SecretBytes>,
        params: CreateParams,
    ) -> WalletResult<Self> {
        let pubkey = ecc::pubkey_from_priv(priv_root.as_slice())?;
        let chaincode = chaincode.unwrap_or_else(|| chaincode_from_root_key(&priv_root));
        let wallet_id = wallet_id_from_armory_root(&pubkey, chaincode.as_slice())?;
        let sc = scaffold(path, &wallet_id, params.kdf)?;

        let scope = sc.container.unlock();
        let (master_id, wrap_id) =
            sc.container
                .setup_master_key(&scope, &sc.kdf, params.passphrase.as_ref())?;
        let cipher_template = Cipher::new(sc.kdf.id(), master_id.clone())?;

        let root = build_armory_root(
            &pubkey,
            Some(&priv_root),
            &sc.container,
            &scope,
            Some(&cipher_template),
        )?;

        let account = AddressAccount::make_new(
            &AccountKind::ArmoryLegacy,
            &AccountRoot::Armory135 {
                privkey: Some(&priv_root),
                pubkey: &pubkey,
                chaincode: chaincode.as_slice(),
            },
            &sc.container,
            &scope,
            &sc.tree,
            Some(&cipher_template),
            params.lookup,
        )?;
        drop(scope);

        let main_account = account.id();
        let mut accounts = BTreeMap::new();
        accounts.insert(account.id(), account);

        let password_kind = if params.passphrase.is_some() {
            PASSWORD_TYPE_PASSPHRASE
        } else {
            PASSWORD_TYPE_DEFAULT_KEY
        };
        finish_creation(
            sc,
            wallet_id,
            main_account,
            accounts,
            Some(root),
            None,
            master_id,
            vec![(password_kind, wrap_id)],
        )
    }

    /// Create a wallet from a Base58 extended key, deriving the given path
    /// first. A public key yields a watching-only wallet; hardened steps
    /// then fail.
    pub fn create_from_base58(
        path: &Path,
        encoded: &str,
        derivation_path: &[u32],
        params: CreateParams,
    ) -> WalletResult<Self> {
        let mut node = Bip32Node::decode_base58(encoded)?;
        for index in derivation_path {
            node = node.derive(*index)?;
        }
        let wallet_id = wallet_id_from_bip32(&node)?;
        let sc = scaffold(path, &wallet_id, params.kdf)?;

        let scope = sc.container.unlock();
        let (master_id, passwords, cipher_template) = if node.is_public() {
            (Vec::new(), Vec::new(), None)
        } else {
            let (master_id, wrap_id) =
                sc.container
                    .setup_master_key(&scope, &sc.kdf, params.passphrase.as_ref())?;
            let password_kind = if params.passphrase.is_some() {
                PASSWORD_TYPE_PASSPHRASE
            } else {
                PASSWORD_TYPE_DEFAULT_KEY
            };
            let template = Cipher::new(sc.kdf.id(), master_id.clone())?;
            (master_id, vec![(password_kind, wrap_id)], Some(template))
        };

        let root = build_wallet_root(&node, &sc.container, &scope, cipher_template.as_ref())?;

        let mut accounts = BTreeMap::new();
        let legacy = AddressAccount::make_new(
            &AccountKind::Bip32Legacy,
            &AccountRoot::Bip32(&node),
            &sc.container,
            &scope,
            &sc.tree,
            cipher_template.as_ref(),
            params.lookup,
        )?;
        let segwit = AddressAccount::make_new(
            &AccountKind::Bip32SegWit,
            &AccountRoot::Bip32(&node),
            &sc.container,
            &scope,
            &sc.tree,
            cipher_template.as_ref(),
            params.lookup,
        )?;
        let main_account = segwit.id();
        accounts.insert(legacy.id(), legacy);
        accounts.insert(segwit.id(), segwit);
        drop(scope);

        finish_creation(
            sc,
            wallet_id,
            main_account,
            accounts,
            Some(root),
            None,
            master_id,
            passwords,
        )
    }

    /// Watching-only legacy wallet from a public root and chaincode.
    pub fn create_from_public_root_armory135(
        path: &Path,
        pub_root: Vec<u8>,
        chaincode: SecretBytes,
        params: CreateParams,
    ) -> WalletResult<Self> {
        let pubkey = ecc::uncompress_point(&pub_root)?;
        let wallet_id = wallet_id_from_armory_root(&pubkey, chaincode.as_slice())?;
        let sc = scaffold(path, &wallet_id, params.kdf)?;

        let scope = sc.container.unlock();
        let root = build_armory_root(&pubkey, None, &sc.container, &scope, None)?;
        let account = AddressAccount::make_new(
            &AccountKind::ArmoryLegacy,
            &AccountRoot::Armory135 {
                privkey: None,
                pubkey: &pubkey,
                chaincode: chaincode.as_slice(),
            },
            &sc.container,
            &scope,
            &sc.tree,
            None,
            params.lookup,
        )?;
        drop(scope);

        let main_account = account.id();
        let mut accounts = BTreeMap::new();
        accounts.insert(account.id(), account);

        finish_creation(
            sc,
            wallet_id,
            main_account,
            accounts,
            Some(root),
            None,
            Vec::new(),
            Vec::new(),
        )
    }

    /// Open an existing wallet file.
    pub fn open(path: &Path) -> WalletResult<Self> {
        let storage = WalletStorage::open(path)?;
        let headers = storage.headers()?;

        let id_bytes = headers.get_existing(&[MAINWALLET_KEY])?;
        let wallet_id = String::from_utf8(id_bytes)
            .map_err(|_| SerializationError::LengthMismatch("invalid wallet id".to_string()))?;

        let mut meta_key = vec![WALLETMETA_PREFIX];
        meta_key.extend_from_slice(wallet_id.as_bytes());
        let meta = WalletMeta::deserialize(&headers.get_existing(&meta_key)?)?;

        let tree = storage.open_tree(&wallet_id)?;
        let container = DecryptedDataContainer::new(
            headers.clone(),
            SecretBytes::new(meta.default_key.clone()),
        );
        container.load()?;

        let parent_id = {
            let bytes = tree.get_existing(&[PARENTID_KEY])?;
            let mut br = BinaryReader::new(&bytes);
            String::from_utf8(br.get_var_bytes()?)
                .map_err(|_| SerializationError::LengthMismatch("invalid parent id".to_string()))?
        };

        let root = match tree.get(&[ROOTASSET_KEY])? {
            Some(bytes) => Some(AssetEntry::deserialize(&bytes)?),
            None => None,
        };
        let seed = match tree.get(&[WALLET_SEED_KEY])? {
            Some(bytes) => Some(EncryptedSeed::deserialize(&bytes)?),
            None => None,
        };

        let main_account = {
            let bytes = tree.get_existing(&[MAIN_ACCOUNT_KEY])?;
            let mut br = BinaryReader::new(&bytes);
            let id_bytes = br.get_var_bytes()?;
            u32::from_be_bytes(id_bytes.as_slice().try_into().map_err(|_| {
                SerializationError::LengthMismatch("main account id is not 4 bytes".to_string())
            })?)
        };

        let mut accounts = BTreeMap::new();
        for (key, _) in tree.scan_prefix(&[ADDRESS_ACCOUNT_PREFIX])? {
            let id = u32::from_be_bytes(key[1..5].try_into().expect("sliced four bytes"));
            accounts.insert(id, AddressAccount::load(&tree, id)?);
        }

        let mut meta_accounts = BTreeMap::new();
        for (key, _) in tree.scan_prefix(&[META_ACCOUNT_PREFIX])? {
            let code = u32::from_be_bytes(key[1..5].try_into().expect("sliced four bytes"));
            let kind = MetaAccountKind::from_code(code)?;
            meta_accounts.insert(code, MetaAccount::load(&tree, kind)?);
        }

        Ok(Self {
            storage,
            headers,
            tree,
            wallet_id,
            parent_id,
            main_account,
            accounts,
            meta_accounts,
            root,
            seed,
            container,
            meta,
            lock: Arc::new(ReentrantLock::new()),
        })
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn parent_id(&self) -> &str {
        &self.parent_id
    }

    pub fn main_account_id(&self) -> u32 {
        self.main_account
    }

    pub fn root_asset(&self) -> Option<&AssetEntry> {
        self.root.as_ref()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AddressAccount> {
        self.accounts.values()
    }

    pub fn account(&self, id: u32) -> Option<&AddressAccount> {
        self.accounts.get(&id)
    }

    pub fn container(&self) -> &DecryptedDataContainer {
        &self.container
    }

    pub fn master_key_id(&self) -> &[u8] {
        &self.meta.master_key_id
    }

    pub fn default_kdf_id(&self) -> &[u8] {
        &self.meta.default_kdf_id
    }

    pub fn storage(&self) -> &WalletStorage {
        &self.storage
    }

    /// True when no asset in the tree holds a private key.
    pub fn is_watching_only(&self) -> bool {
        let root_private = self.root.as_ref().is_some_and(|r| r.has_private_key());
        let account_private = self.accounts.values().any(|account| {
            account.asset_accounts().any(|chain| {
                chain.root().is_some_and(|r| r.has_private_key())
                    || chain.assets().any(|a| a.has_private_key())
            })
        });
        !root_private && !account_private
    }

    fn main_account_mut(&mut self) -> WalletResult<&mut AddressAccount> {
        let id = self.main_account;
        self.accounts
            .get_mut(&id)
            .ok_or_else(|| AccountError::UnknownAccount(id).into())
    }

    /// New receive address from the main account.
    pub fn get_new_address(
        &mut self,
        address_type: Option<AddressType>,
    ) -> WalletResult<AddressEntry> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let tree = self.tree.clone();
        self.main_account_mut()?.get_new_address(&tree, address_type)
    }

    /// New change address from the main account.
    pub fn get_new_change_address(
        &mut self,
        address_type: Option<AddressType>,
    ) -> WalletResult<AddressEntry> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let tree = self.tree.clone();
        self.main_account_mut()?
            .get_new_change_address(&tree, address_type)
    }

    pub fn get_asset_for_id(&self, asset_id: &AssetId) -> WalletResult<&AssetEntry> {
        self.accounts
            .get(&asset_id.address_account)
            .ok_or(AccountError::UnknownAccount(asset_id.address_account))?
            .get_asset_for_id(asset_id)
    }

    /// Address entry for an existing asset, honoring overrides.
    pub fn get_address_entry_for_id(&self, asset_id: &AssetId) -> WalletResult<AddressEntry> {
        self.accounts
            .get(&asset_id.address_account)
            .ok_or(AccountError::UnknownAccount(asset_id.address_account))?
            .get_address_entry_for_id(asset_id)
    }

    /// Look an address up by prefixed script hash.
    pub fn get_asset_id_for_scr_addr(
        &self,
        prefixed_hash: &[u8],
    ) -> WalletResult<(AssetId, AddressType)> {
        for account in self.accounts.values() {
            for (asset_id, per_type) in account.get_address_hash_map()? {
                for (address_type, hash) in per_type {
                    if hash == prefixed_hash {
                        return Ok((asset_id, address_type));
                    }
                }
            }
        }
        Err(ResolverError::UnknownAddress.into())
    }

    /// Look an address up by its string form or raw prefixed hash hex.
    pub fn get_asset_id_for_addr(&self, address: &str) -> WalletResult<(AssetId, AddressType)> {
        let prefixed = address_string_to_prefixed_hash(address)?;
        self.get_asset_id_for_scr_addr(&prefixed)
    }

    pub fn extend_public_chain(&mut self, count: u32) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        for account in self.accounts.values_mut() {
            account.extend_public_chain(&self.tree, count)?;
        }
        Ok(())
    }

    pub fn extend_private_chain(&mut self, count: u32) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let scope = self.container.unlock();
        for account in self.accounts.values_mut() {
            account.extend_private_chain(&self.container, &scope, &self.tree, count)?;
        }
        Ok(())
    }

    /// Extend one account's private chain to a target index.
    pub fn extend_private_chain_to_index(
        &mut self,
        account_id: u32,
        chain_id: u32,
        target: u32,
    ) -> WalletResult<()> {
        let lock = Arc::clone(&self.lock);
        let _guard = lock.acquire();
        let scope = self.container.unlock();
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or(AccountError::UnknownAccount(account_id))?;
        let chain = account
            .asset_account_mut(chain_id)
            .ok_or(AccountError::UnknownAccount(chain_id))?;
        chain.extend_private_chain_to_index(&self.container, &scope, &self.tree, target)
    }

    /// Scoped unlock of the decrypted-data container.
    pub fn unlock(&self) -> ContainerLock<'_> {
        self.container.unlock()
    }

    pub fn push_passphrase_prompt(&self, prompt: PassphrasePrompt) {
        self.container.push_prompt(prompt);
    }

    pub fn pop_passphrase_prompt(&self) {
        self.container.pop_prompt();
    }

    /// The decrypted wallet seed, under an unlock scope.
    pub fn get_decrypted_seed(&self, scope: &ContainerLock<'_>) -> WalletResult<SecretBytes> {
        let seed = self
            .seed
            .as_ref()
            .ok_or_else(|| EncryptionError::KeyUnavailable("wallet has no seed".to_string()))?;
        Ok(self.container.decrypt_cipher_data(scope, &seed.data)?)
    }

    fn persist_meta(&self) -> WalletResult<()> {
        let mut meta_key = vec![WALLETMETA_PREFIX];
        meta_key.extend_from_slice(self.wallet_id.as_bytes());
        self.headers.put(&meta_key, &self.meta.serialize())?;
        self.headers.flush()?;
        Ok(())
    }

    /// Append an additional passphrase over the master key.
    pub fn add_passphrase(&mut self, passphrase: SecretBytes) -> WalletResult<()> {
        self.rotate_passphrase(Some(passphrase), false)
    }

    /// Replace every wrapping of the master key with a new passphrase.
    pub fn change_master_passphrase(&mut self, passphrase: SecretBytes) -> WalletResult<()> {
        self.rotate_passphrase(Some(passphrase), true)
    }

    fn rotate_passphrase(
        &mut self,
        passphrase: Option<SecretBytes>,
        replace: bool,
    ) -> WalletResult<()> {
        if self.meta.master_key_id.is_empty() {
            return Err(EncryptionError::KeyUnavailable(
                "watching-only wallet has no master key".to_string(),
            )
            .into());
        }
        let new_wrap_id = self.container.change_master_passphrase(
            &self.meta.master_key_id,
            &self.meta.default_kdf_id,
            passphrase.as_ref(),
            replace,
        )?;
        let kind = if passphrase.is_some() {
            PASSWORD_TYPE_PASSPHRASE
        } else {
            PASSWORD_TYPE_DEFAULT_KEY
        };
        if replace {
            self.meta.passwords.clear();
        }
        self.meta.passwords.push((kind, new_wrap_id));
        self.persist_meta()
    }

    // Comment metadata surface.

    fn comments_account(&mut self) -> &mut MetaAccount {
        self.meta_accounts
            .entry(MetaAccountKind::Comments.code())
            .or_insert_with(|| MetaAccount::new(MetaAccountKind::Comments))
    }

    pub fn set_comment(&mut self, key: &[u8], text: &str) -> WalletResult<()> {
        let tree = self.tree.clone();
        let account = self.comments_account();
        account.set_comment(key, text)?;
        account.commit(&tree)
    }

    pub fn get_comment(&self, key: &[u8]) -> Option<&str> {
        self.meta_accounts
            .get(&MetaAccountKind::Comments.code())
            .and_then(|account| account.get_comment(key))
    }

    pub fn delete_comment(&mut self, key: &[u8]) -> WalletResult<bool> {
        let tree = self.tree.clone();
        let account = self.comments_account();
        let deleted = account.delete_comment(key);
        account.commit(&tree)?;
        Ok(deleted)
    }

    // Authorized-peer metadata surface.

    fn peers_account(&mut self) -> &mut MetaAccount {
        self.meta_accounts
            .entry(MetaAccountKind::AuthPeers.code())
            .or_insert_with(|| MetaAccount::new(MetaAccountKind::AuthPeers))
    }

    pub fn add_peer(&mut self, pubkey: &[u8], names: &[String]) -> WalletResult<()> {
        let pubkey = ecc::compress_point(pubkey)?;
        let tree = self.tree.clone();
        let account = self.peers_account();
        let existing = account.assets().find_map(|(index, asset)| match asset {
            MetaAsset::AuthPeer {
                pubkey: existing,
                names,
            } if *existing == pubkey => Some((index, names.clone())),
            _ => None,
        });
        match existing {
            Some((index, mut merged)) => {
                for name in names {
                    if !merged.contains(name) {
                        merged.push(name.clone());
                    }
                }
                account.update(
                    index,
                    MetaAsset::AuthPeer {
                        pubkey,
                        names: merged,
                    },
                );
            }
            None => {
                account.insert(MetaAsset::AuthPeer {
                    pubkey,
                    names: names.to_vec(),
                });
            }
        }
        account.commit(&tree)
    }

    /// Remove a peer name. The wallet's own key cannot be erased.
    pub fn erase_peer(&mut self, name: &str) -> WalletResult<()> {
        let own = self.own_peer_key()?;
        let tree = self.tree.clone();
        let account = self.peers_account();
        let found = account.assets().find_map(|(index, asset)| match asset {
            MetaAsset::AuthPeer { pubkey, names } if names.iter().any(|n| n == name) => {
                Some((index, pubkey.clone(), names.clone()))
            }
            _ => None,
        });
        let Some((index, pubkey, names)) = found else {
            return Err(WalletError::InvalidInput(format!("unknown peer: {name}")));
        };
        if pubkey == own {
            return Err(WalletError::InvariantViolation(
                "own key cannot be erased".to_string(),
            ));
        }
        let remaining: Vec<String> = names.into_iter().filter(|n| n != name).collect();
        if remaining.is_empty() {
            account.erase(index);
        } else {
            account.update(
                index,
                MetaAsset::AuthPeer {
                    pubkey,
                    names: remaining,
                },
            );
        }
        account.commit(&tree)
    }

    pub fn peer_projection(&self) -> PeerProjection {
        self.meta_accounts
            .get(&MetaAccountKind::AuthPeers.code())
            .map(PeerProjection::from_account)
            .unwrap_or_default()
    }

    /// Our own handshake identity: the compressed key of the main
    /// account's first outer asset.
    pub fn own_peer_key(&self) -> WalletResult<Vec<u8>> {
        let account = self
            .accounts
            .get(&self.main_account)
            .ok_or(AccountError::UnknownAccount(self.main_account))?;
        let chain = account
            .asset_account(account.outer_account_id())
            .ok_or(AccountError::UnknownAccount(account.outer_account_id()))?;
        let asset = chain.get_asset(0).ok_or(AccountError::UnknownAsset)?;
        Ok(asset.pubkey_compressed()?)
    }

    /// Emit a watching-only mirror of this wallet at `path`.
    pub fn fork_watching_only(&self, path: &Path) -> WalletResult<Wallet> {
        let storage = WalletStorage::create(path)?;
        let headers = storage.headers()?;
        let tree = storage.open_tree(&self.wallet_id)?;

        let fork_meta = WalletMeta {
            wallet_type: WALLET_TYPE_SINGLE,
            version: self.meta.version,
            default_key: self.meta.default_key.clone(),
            default_kdf_id: Vec::new(),
            master_key_id: Vec::new(),
            passwords: Vec::new(),
        };

        headers.put(&[MASTERID_KEY], self.wallet_id.as_bytes())?;
        headers.put(&[MAINWALLET_KEY], self.wallet_id.as_bytes())?;
        let mut meta_key = vec![WALLETMETA_PREFIX];
        meta_key.extend_from_slice(self.wallet_id.as_bytes());
        headers.put(&meta_key, &fork_meta.serialize())?;

        write_wallet_records(
            &tree,
            &self.wallet_id,
            &self.parent_id,
            self.main_account,
            self.root.as_ref().map(|r| r.public_copy()).as_ref(),
        )?;

        for account in self.accounts.values() {
            let mut copy = account.watching_only_copy();
            copy.commit(&tree)?;
        }
        storage.flush()?;
        drop(headers);
        drop(tree);
        drop(storage);

        info!(wallet = %self.wallet_id, "forked watching-only copy");
        Wallet::open(path)
    }

    /// Delete the wallet file from disk.
    pub fn erase_file(self) -> WalletResult<()> {
        let Wallet { storage, .. } = self;
        storage.erase()?;
        Ok(())
    }
}

fn build_wallet_root(
    node: &Bip32Node,
    container: &DecryptedDataContainer,
    scope: &ContainerLock<'_>,
    cipher_template: Option<&Cipher>,
) -> WalletResult<AssetEntry> {
    let info = crate::wallet::asset::Bip32Info {
        chaincode: *node.chaincode(),
        depth: node.depth(),
        leaf_id: node.child_num(),
        fingerprint: node.fingerprint(),
    };
    let pubkey = ecc::uncompress_point(node.pubkey())?;
    let id = wallet_root_asset_id();
    let asset = match (node.privkey(), cipher_template) {
        (Some(privkey), Some(template)) => {
            let cipher = template.for_new_plaintext()?;
            let ciphertext = container.encrypt_data(scope, &cipher, privkey.as_slice())?;
            AssetEntry::new_with_private_key(
                id,
                pubkey,
                crate::encryption::EncryptedPrivateKey {
                    id: id.privkey_id(),
                    data: crate::encryption::KeyData::Encrypted {
                        data: CipherData::new(ciphertext, cipher),
                    },
                },
            )
        }
        _ => AssetEntry::new_public(id, pubkey),
    };
    Ok(asset.with_bip32_info(info))
}

fn build_armory_root(
    pubkey: &[u8],
    privkey: Option<&SecretBytes>,
    container: &DecryptedDataContainer,
    scope: &ContainerLock<'_>,
    cipher_template: Option<&Cipher>,
) -> WalletResult<AssetEntry> {
    let id = wallet_root_asset_id();
    Ok(match (privkey, cipher_template) {
        (Some(privkey), Some(template)) => {
            let cipher = template.for_new_plaintext()?;
            let ciphertext = container.encrypt_data(scope, &cipher, privkey.as_slice())?;
            AssetEntry::new_with_private_key(
                id,
                pubkey.to_vec(),
                crate::encryption::EncryptedPrivateKey {
                    id: id.privkey_id(),
                    data: crate::encryption::KeyData::Encrypted {
                        data: CipherData::new(ciphertext, cipher),
                    },
                },
            )
        }
        _ => AssetEntry::new_public(id, pubkey.to_vec()),
    })
}

fn write_wallet_records(
    tree: &DbTree,
    wallet_id: &str,
    parent_id: &str,
    main_account: u32,
    root: Option<&AssetEntry>,
) -> WalletResult<()> {
    let mut bw = BinaryWriter::new();
    bw.put_u32_le(WALLET_TYPE_SINGLE);
    tree.put(&[WALLETTYPE_KEY], bw.as_slice())?;

    let mut bw = BinaryWriter::new();
    bw.put_var_bytes(parent_id.as_bytes());
    tree.put(&[PARENTID_KEY], bw.as_slice())?;

    let mut bw = BinaryWriter::new();
    bw.put_var_bytes(wallet_id.as_bytes());
    tree.put(&[WALLETID_KEY], bw.as_slice())?;

    let mut bw = BinaryWriter::new();
    bw.put_var_bytes(&main_account.to_be_bytes());
    tree.put(&[MAIN_ACCOUNT_KEY], bw.as_slice())?;

    if let Some(root) = root {
        tree.put(&[ROOTASSET_KEY], &root.serialize())?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn finish_creation(
    sc: Scaffold,
    wallet_id: String,
    main_account: u32,
    accounts: BTreeMap<u32, AddressAccount>,
    root: Option<AssetEntry>,
    seed: Option<EncryptedSeed>,
    master_key_id: Vec<u8>,
    passwords: Vec<(u8, Vec<u8>)>,
) -> WalletResult<Wallet> {
    let meta = WalletMeta {
        wallet_type: WALLET_TYPE_SINGLE,
        version: WALLET_VERSION,
        default_key: sc.default_key.as_slice().to_vec(),
        default_kdf_id: if master_key_id.is_empty() {
            Vec::new()
        } else {
            sc.kdf.id()
        },
        master_key_id,
        passwords,
    };

    sc.headers.put(&[MASTERID_KEY], wallet_id.as_bytes())?;
    sc.headers.put(&[MAINWALLET_KEY], wallet_id.as_bytes())?;
    let mut meta_key = vec![WALLETMETA_PREFIX];
    meta_key.extend_from_slice(wallet_id.as_bytes());
    sc.headers.put(&meta_key, &meta.serialize())?;

    write_wallet_records(&sc.tree, &wallet_id, "", main_account, root.as_ref())?;
    sc.storage.flush()?;

    info!(wallet = %wallet_id, accounts = accounts.len(), "created wallet");
    Ok(Wallet {
        storage: sc.storage,
        headers: sc.headers,
        tree: sc.tree,
        wallet_id,
        parent_id: String::new(),
        main_account,
        accounts,
        meta_accounts: BTreeMap::new(),
        root,
        seed,
        container: sc.container,
        meta,
        lock: Arc::new(ReentrantLock::new()),
    })
}

/// Multisig wallet kind: an aggregate over single wallets whose combined
/// keys form m-of-n scripts. Key resolution happens through the multisig
/// resolver feed.
pub struct MultisigWallet {
    id: String,
    wallets: Vec<Wallet>,
}

impl MultisigWallet {
    pub fn new(wallets: Vec<Wallet>) -> WalletResult<Self> {
        if wallets.is_empty() {
            return Err(WalletError::InvalidInput(
                "multisig wallet needs at least one member".to_string(),
            ));
        }
        let mut preimage = Vec::new();
        for wallet in &wallets {
            preimage.extend_from_slice(wallet.wallet_id().as_bytes());
        }
        let digest = hash256(&preimage);
        Ok(Self {
            id: base58::encode(&digest[..6]),
            wallets,
        })
    }

    pub fn wallet_id(&self) -> &str {
        &self.id
    }

    pub fn wallets(&self) -> &[Wallet] {
        &self.wallets
    }

    pub fn wallets_mut(&mut self) -> &mut [Wallet] {
        &mut self.wallets
    }
}

/// The authorized-peers wallet: a single-key wallet whose metadata
/// account maps peer names to public keys for the encrypted-handshake
/// authentication step.
pub struct AuthorizedPeers {
    wallet: Wallet,
}

impl AuthorizedPeers {
    /// Create a fresh peers wallet with its own identity key.
    pub fn create(path: &Path, params: CreateParams) -> WalletResult<Self> {
        let seed = SecretBytes::random(32)?;
        let mut wallet = Wallet::create_from_seed(path, seed.as_slice(), params)?;
        // The identity key is the first outer asset; register it under the
        // reserved "own" name.
        let _ = wallet.get_new_address(None)?;
        let own = wallet.own_peer_key()?;
        wallet.add_peer(&own, &["own".to_string()])?;
        Ok(Self { wallet })
    }

    pub fn open(path: &Path) -> WalletResult<Self> {
        Ok(Self {
            wallet: Wallet::open(path)?,
        })
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn own_public_key(&self) -> WalletResult<Vec<u8>> {
        self.wallet.own_peer_key()
    }

    pub fn add_peer(&mut self, pubkey: &[u8], names: &[String]) -> WalletResult<()> {
        self.wallet.add_peer(pubkey, names)
    }

    pub fn erase_peer(&mut self, name: &str) -> WalletResult<()> {
        self.wallet.erase_peer(name)
    }

    pub fn projection(&self) -> PeerProjection {
        self.wallet.peer_projection()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DerivationError;
    use crate::wallet::address::AddressType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    const SEED_HEX: &str = "000102030405060708090a0b0c0d0e0f";

    fn params(passphrase: Option<&str>, lookup: u32) -> CreateParams {
        CreateParams {
            passphrase: passphrase.map(|p| SecretBytes::from(p.as_bytes())),
            lookup,
            kdf: Some(KdfRomix::from_params(2048, 1, vec![0x71; 32])),
        }
    }

    fn prompt_sequence(
        answers: Vec<&'static str>,
    ) -> (PassphrasePrompt, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);
        let prompt: PassphrasePrompt = Arc::new(move |_ids| {
            let index = seen.fetch_add(1, Ordering::SeqCst);
            let answer = answers.get(index).copied().unwrap_or("");
            SecretBytes::from(answer.as_bytes())
        });
        (prompt, counter)
    }

    #[test]
    fn test_create_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();

        let first_hash;
        let wallet_id;
        {
            let mut wallet = Wallet::create_from_seed(&path, &seed, params(None, 3)).unwrap();
            wallet_id = wallet.wallet_id().to_string();
            assert!(!wallet.is_watching_only());
            assert_eq!(wallet.accounts().count(), 2);

            let receive = wallet.get_new_address(None).unwrap();
            assert_eq!(receive.address_type(), AddressType::P2wpkh);
            first_hash = receive.prefixed_hash().unwrap();
            let change = wallet.get_new_change_address(None).unwrap();
            assert_ne!(change.prefixed_hash().unwrap(), first_hash);

            wallet.set_comment(b"addr0", "lunch money").unwrap();
        }

        let wallet = Wallet::open(&path).unwrap();
        assert_eq!(wallet.wallet_id(), wallet_id);
        assert_eq!(wallet.get_comment(b"addr0"), Some("lunch money"));

        let (asset_id, address_type) = wallet.get_asset_id_for_scr_addr(&first_hash).unwrap();
        assert_eq!(address_type, AddressType::P2wpkh);
        let entry = wallet.get_address_entry_for_id(&asset_id).unwrap();
        assert_eq!(entry.prefixed_hash().unwrap(), first_hash);

        // Every stored private key decrypts to the stored public key.
        let scope = wallet.unlock();
        for account in wallet.accounts() {
            for chain in account.asset_accounts() {
                for asset in chain.assets() {
                    let plain = wallet
                        .container()
                        .get_decrypted_private_key(&scope, asset.privkey().unwrap())
                        .unwrap();
                    assert_eq!(
                        ecc::pubkey_from_priv(plain.as_slice()).unwrap(),
                        asset.pubkey_uncompressed()
                    );
                }
            }
        }
    }

    #[test]
    fn test_wrong_passphrase_retries_then_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        drop(Wallet::create_from_seed(&path, &seed, params(Some("test"), 4)).unwrap());

        let wallet = Wallet::open(&path).unwrap();
        let (prompt, attempts) = prompt_sequence(vec!["bad", "bad", "test"]);
        wallet.push_passphrase_prompt(prompt);

        let scope = wallet.unlock();
        let account = wallet.account(wallet.main_account_id()).unwrap();
        let chain = account.asset_account(account.outer_account_id()).unwrap();
        let asset = chain.get_asset(0).unwrap();
        let plain = wallet
            .container()
            .get_decrypted_private_key(&scope, asset.privkey().unwrap())
            .unwrap();
        assert_eq!(
            ecc::pubkey_from_priv(plain.as_slice()).unwrap(),
            asset.pubkey_uncompressed()
        );
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancelled_passphrase_leaves_no_secrets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        drop(Wallet::create_from_seed(&path, &seed, params(Some("test"), 4)).unwrap());

        let wallet = Wallet::open(&path).unwrap();
        let (prompt, _) = prompt_sequence(vec!["bad", "bad"]);
        wallet.push_passphrase_prompt(prompt);

        let scope = wallet.unlock();
        let account = wallet.account(wallet.main_account_id()).unwrap();
        let chain = account.asset_account(account.outer_account_id()).unwrap();
        let asset = chain.get_asset(0).unwrap();
        let result = wallet
            .container()
            .get_decrypted_private_key(&scope, asset.privkey().unwrap());
        assert!(matches!(
            result,
            Err(EncryptionError::PassphraseCancelled)
        ));
        drop(scope);
        assert!(wallet.container().is_cache_empty());
    }

    #[test]
    fn test_passphrase_rotation_rewrites_only_master_material() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        let mut wallet =
            Wallet::create_from_seed(&path, &seed, params(Some("old"), 3)).unwrap();

        let master_id = wallet.master_key_id().to_vec();
        let record = wallet.container().get_encrypted_key(&master_id).unwrap();
        let (old_iv, old_ct) = {
            let cd = record.cipher_data().values().next().unwrap();
            (cd.cipher.iv().to_vec(), cd.ciphertext.clone())
        };

        let asset_cts: Vec<Vec<u8>> = wallet
            .accounts()
            .flat_map(|a| a.asset_accounts())
            .flat_map(|c| c.assets())
            .map(|asset| match &asset.privkey().unwrap().data {
                crate::encryption::KeyData::Encrypted { data } => data.ciphertext.clone(),
                crate::encryption::KeyData::Clear { .. } => panic!("expected ciphertext"),
            })
            .collect();
        assert!(!asset_cts.is_empty());

        let (prompt, _) = prompt_sequence(vec!["old"]);
        wallet.push_passphrase_prompt(prompt);
        wallet
            .change_master_passphrase(SecretBytes::from(&b"new"[..]))
            .unwrap();
        wallet.pop_passphrase_prompt();

        // Old master ciphertext and IV are gone from the store; the new
        // wrapping is present.
        assert!(!wallet.storage().contains_bytes(&old_ct).unwrap());
        assert!(!wallet.storage().contains_bytes(&old_iv).unwrap());
        let rotated = wallet.container().get_encrypted_key(&master_id).unwrap();
        assert_eq!(rotated.cipher_data().len(), 1);
        let new_ct = rotated
            .cipher_data()
            .values()
            .next()
            .unwrap()
            .ciphertext
            .clone();
        assert!(wallet.storage().contains_bytes(&new_ct).unwrap());

        // Asset ciphertexts are untouched.
        for ct in &asset_cts {
            assert!(wallet.storage().contains_bytes(ct).unwrap());
        }
        drop(wallet);

        // Reload decrypts with the new passphrase, not the old.
        let wallet = Wallet::open(&path).unwrap();
        let (prompt, _) = prompt_sequence(vec!["new"]);
        wallet.push_passphrase_prompt(prompt);
        let scope = wallet.unlock();
        assert_eq!(
            wallet.get_decrypted_seed(&scope).unwrap().as_slice(),
            seed.as_slice()
        );
        drop(scope);
        wallet.pop_passphrase_prompt();

        let (prompt, _) = prompt_sequence(vec!["old"]);
        wallet.push_passphrase_prompt(prompt);
        let scope = wallet.unlock();
        assert!(matches!(
            wallet.get_decrypted_seed(&scope),
            Err(WalletError::Encryption(EncryptionError::PassphraseCancelled))
        ));
    }

    #[test]
    fn test_added_passphrase_coexists_until_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        let mut wallet =
            Wallet::create_from_seed(&path, &seed, params(Some("one"), 3)).unwrap();

        let (prompt, _) = prompt_sequence(vec!["one"]);
        wallet.push_passphrase_prompt(prompt);
        wallet.add_passphrase(SecretBytes::from(&b"two"[..])).unwrap();
        wallet.pop_passphrase_prompt();

        // Either passphrase opens the wallet now.
        for pass in ["one", "two"] {
            let (prompt, _) = prompt_sequence(vec![pass]);
            wallet.push_passphrase_prompt(prompt);
            let scope = wallet.unlock();
            assert!(wallet.get_decrypted_seed(&scope).is_ok());
            drop(scope);
            wallet.pop_passphrase_prompt();
        }

        let (prompt, _) = prompt_sequence(vec!["two"]);
        wallet.push_passphrase_prompt(prompt);
        wallet
            .change_master_passphrase(SecretBytes::from(&b"three"[..]))
            .unwrap();
        wallet.pop_passphrase_prompt();

        let (prompt, _) = prompt_sequence(vec!["one"]);
        wallet.push_passphrase_prompt(prompt);
        let scope = wallet.unlock();
        assert!(wallet.get_decrypted_seed(&scope).is_err());
        drop(scope);
        wallet.pop_passphrase_prompt();

        let (prompt, _) = prompt_sequence(vec!["three"]);
        wallet.push_passphrase_prompt(prompt);
        let scope = wallet.unlock();
        assert!(wallet.get_decrypted_seed(&scope).is_ok());
    }

    #[test]
    fn test_no_cleartext_private_key_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        let wallet = Wallet::create_from_seed(&path, &seed, params(None, 3)).unwrap();

        let scope = wallet.unlock();
        let account = wallet.account(wallet.main_account_id()).unwrap();
        let chain = account.asset_account(account.outer_account_id()).unwrap();
        let asset = chain.get_asset(0).unwrap();
        let plain = wallet
            .container()
            .get_decrypted_private_key(&scope, asset.privkey().unwrap())
            .unwrap();
        drop(scope);

        assert!(!wallet
            .storage()
            .contains_bytes(plain.as_slice())
            .unwrap());
        // The seed itself must not be stored in the clear either.
        assert!(!wallet.storage().contains_bytes(&seed).unwrap());
    }

    #[test]
    fn test_armory135_wallet_hands_out_legacy_addresses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let priv_root = SecretBytes::from(vec![0x45u8; 32]);

        let mut wallet = Wallet::create_from_private_root_armory135(
            &path,
            priv_root,
            None,
            params(None, 3),
        )
        .unwrap();
        assert_eq!(
            wallet.main_account_id(),
            crate::wallet::address_account::ARMORY_LEGACY_ACCOUNTID
        );
        let entry = wallet.get_new_address(None).unwrap();
        assert_eq!(entry.address_type(), AddressType::P2pkh);
        let address = entry.address_string().unwrap();
        assert!(address.starts_with('1'));
        drop(wallet);

        let wallet = Wallet::open(&path).unwrap();
        let (asset_id, _) = wallet.get_asset_id_for_addr(&address).unwrap();
        assert_eq!(asset_id.index, 0);
    }

    #[test]
    fn test_xpub_wallet_mirrors_xprv_addresses() {
        let dir = TempDir::new().unwrap();
        let seed = hex::decode(SEED_HEX).unwrap();
        let node = Bip32Node::from_seed(&seed).unwrap();

        let mut private_wallet = Wallet::create_from_base58(
            &dir.path().join("private"),
            &node.encode_base58(),
            &[],
            params(None, 3),
        )
        .unwrap();
        let mut public_wallet = Wallet::create_from_base58(
            &dir.path().join("public"),
            &node.public_copy().encode_base58(),
            &[],
            params(None, 3),
        )
        .unwrap();

        assert!(!private_wallet.is_watching_only());
        assert!(public_wallet.is_watching_only());
        assert_eq!(private_wallet.wallet_id(), public_wallet.wallet_id());

        for _ in 0..3 {
            let a = private_wallet.get_new_address(None).unwrap();
            let b = public_wallet.get_new_address(None).unwrap();
            assert_eq!(a.prefixed_hash().unwrap(), b.prefixed_hash().unwrap());
        }

        // A hardened derivation path is impossible from the public key.
        let result = Wallet::create_from_base58(
            &dir.path().join("hardened"),
            &node.public_copy().encode_base58(),
            &[0x8000_0000],
            params(None, 3),
        );
        assert!(matches!(
            result,
            Err(WalletError::Derivation(DerivationError::HardenedFromPublic))
        ));
    }

    #[test]
    fn test_fork_watching_only() {
        let dir = TempDir::new().unwrap();
        let seed = hex::decode(SEED_HEX).unwrap();
        let mut wallet = Wallet::create_from_seed(
            &dir.path().join("wallet"),
            &seed,
            params(None, 3),
        )
        .unwrap();
        let handed_out = wallet.get_new_address(None).unwrap();

        let mut fork = wallet.fork_watching_only(&dir.path().join("fork")).unwrap();
        assert!(fork.is_watching_only());
        assert_eq!(fork.wallet_id(), wallet.wallet_id());

        // The watermark survived, so the fork continues the sequence.
        let next_parent = wallet.get_new_address(None).unwrap();
        let next_fork = fork.get_new_address(None).unwrap();
        assert_eq!(
            next_parent.prefixed_hash().unwrap(),
            next_fork.prefixed_hash().unwrap()
        );

        // And the already-handed-out address is known to the fork.
        let (asset_id, _) = fork
            .get_asset_id_for_scr_addr(&handed_out.prefixed_hash().unwrap())
            .unwrap();
        assert!(!fork.get_asset_for_id(&asset_id).unwrap().has_private_key());
    }

    #[test]
    fn test_peer_surface() {
        let dir = TempDir::new().unwrap();
        let mut peers = AuthorizedPeers::create(
            &dir.path().join("peers"),
            params(None, 2),
        )
        .unwrap();

        let own = peers.own_public_key().unwrap();
        let other = ecc::compressed_pubkey_from_priv(&[0x11u8; 32]).unwrap();
        peers
            .add_peer(&other, &["bob".to_string(), "bob.local".to_string()])
            .unwrap();

        let projection = peers.projection();
        assert_eq!(projection.name_map["own"], own);
        assert_eq!(projection.name_map["bob"], other);

        // The own key is reserved.
        assert!(peers.erase_peer("own").is_err());
        peers.erase_peer("bob").unwrap();
        let projection = peers.projection();
        assert!(!projection.name_map.contains_key("bob"));
        assert!(projection.name_map.contains_key("bob.local"));
    }

    #[test]
    fn test_multisig_wallet_id_is_stable() {
        let dir = TempDir::new().unwrap();
        let wallet_a = Wallet::create_from_seed(
            &dir.path().join("a"),
            &hash256(b"seed a"),
            params(None, 2),
        )
        .unwrap();
        let wallet_b = Wallet::create_from_seed(
            &dir.path().join("b"),
            &hash256(b"seed b"),
            params(None, 2),
        )
        .unwrap();

        let multisig = MultisigWallet::new(vec![wallet_a, wallet_b]).unwrap();
        assert_eq!(multisig.wallets().len(), 2);
        assert!(!multisig.wallet_id().is_empty());
        assert!(MultisigWallet::new(Vec::new()).is_err());
    }

    #[test]
    fn test_erase_file_removes_wallet() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wallet");
        let seed = hex::decode(SEED_HEX).unwrap();
        let wallet = Wallet::create_from_seed(&path, &seed, params(None, 2)).unwrap();
        wallet.erase_file().unwrap();
        assert!(!path.exists());
        assert!(matches!(
            Wallet::open(&path),
            Err(WalletError::Storage(crate::error::StorageError::FileMissing(_)))
        ));
    }
}
