use serde::{Deserialize, Serialize};

use crate::ldf::{Access, Field, LdfRecord};

/// Client boot configuration (`boot.cfg`). A server's patch-server address
/// lives here, so a patch that rewrites it also redirects later fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub server_name: String,
    pub patch_server_ip: String,
    pub auth_server_ip: String,
    pub patch_server_port: i32,
    pub logging: i32,
    pub data_center_id: u32,
    pub cp_code: i32,
    pub akamai_dlm: bool,
    pub patch_server_dir: String,
    pub ugc_use_3d_services: bool,
    pub ugc_server_ip: String,
    pub ugc_server_dir: String,
    pub pass_url: String,
    pub sign_in_url: String,
    pub sign_up_url: String,
    pub register_url: String,
    pub crash_log_url: String,
    pub locale: String,
    pub track_disk_usage: bool,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            patch_server_ip: "localhost".to_string(),
            auth_server_ip: "localhost".to_string(),
            patch_server_port: 80,
            logging: 100,
            data_center_id: 150,
            cp_code: 89,
            akamai_dlm: false,
            patch_server_dir: "luclient".to_string(),
            ugc_use_3d_services: true,
            ugc_server_ip: "localhost".to_string(),
            ugc_server_dir: "3dservices".to_string(),
            pass_url: String::new(),
            sign_in_url: String::new(),
            sign_up_url: String::new(),
            register_url: String::new(),
            crash_log_url: String::new(),
            locale: "en_US".to_string(),
            track_disk_usage: true,
        }
    }
}

macro_rules! string_field {
    ($key:literal, $name:ident) => {
        Field {
            key: $key,
            access: Access::String(|r| r.$name.clone(), |r, v| r.$name = v),
        }
    };
}

static BOOT_FIELDS: [Field<BootConfig>; 19] = [
    string_field!("SERVERNAME", server_name),
    string_field!("PATCHSERVERIP", patch_server_ip),
    string_field!("AUTHSERVERIP", auth_server_ip),
    Field {
        key: "PATCHSERVERPORT",
        access: Access::I32(|r| r.patch_server_port, |r, v| r.patch_server_port = v),
    },
    Field {
        key: "LOGGING",
        access: Access::I32(|r| r.logging, |r, v| r.logging = v),
    },
    Field {
        key: "DATACENTERID",
        access: Access::U32(|r| r.data_center_id, |r, v| r.data_center_id = v),
    },
    Field {
        key: "CPCODE",
        access: Access::I32(|r| r.cp_code, |r, v| r.cp_code = v),
    },
    Field {
        key: "AKAMAIDLM",
        access: Access::Bool(|r| r.akamai_dlm, |r, v| r.akamai_dlm = v),
    },
    string_field!("PATCHSERVERDIR", patch_server_dir),
    Field {
        key: "UGCUSE3DSERVICES",
        access: Access::Bool(|r| r.ugc_use_3d_services, |r, v| r.ugc_use_3d_services = v),
    },
    string_field!("UGCSERVERIP", ugc_server_ip),
    string_field!("UGCSERVERDIR", ugc_server_dir),
    string_field!("PASSURL", pass_url),
    string_field!("SIGNINURL", sign_in_url),
    string_field!("SIGNUPURL", sign_up_url),
    string_field!("REGISTERURL", register_url),
    string_field!("CRASHLOGURL", crash_log_url),
    string_field!("LOCALE", locale),
    Field {
        key: "TRACK_DSK_USAGE",
        access: Access::Bool(|r| r.track_disk_usage, |r, v| r.track_disk_usage = v),
    },
];

impl LdfRecord for BootConfig {
    fn fields() -> &'static [Field<Self>] {
        &BOOT_FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldf;

    const STOCK_BOOT: &str = "SERVERNAME=0:Overbuild Universe (US),
PATCHSERVERIP=0:patch.example.net,
AUTHSERVERIP=0:auth.example.net,
PATCHSERVERPORT=1:8000,
LOGGING=1:100,
DATACENTERID=5:150,
CPCODE=1:89,
AKAMAIDLM=7:0,
PATCHSERVERDIR=0:luclient,
UGCUSE3DSERVICES=7:1,
UGCSERVERIP=0:localhost,
UGCSERVERDIR=0:3dservices,
PASSURL=0:https://account.example.net/SendPassword.aspx?Username=,
SIGNINURL=0:https://account.example.net/SignIn.aspx,
SIGNUPURL=0:http://universe.example.net/registration/,
REGISTERURL=0:https://secure.example.net/subscription/,
CRASHLOGURL=0:http://services.example.net/cls.aspx,
LOCALE=0:en_US,
TRACK_DSK_USAGE=7:1,
HD_SPACE_FREE=0:12345,
";

    #[test]
    fn test_decode_stock_boot_file() {
        let boot: BootConfig = ldf::from_bytes(STOCK_BOOT.as_bytes()).unwrap();
        assert_eq!(boot.server_name, "Overbuild Universe (US)");
        assert_eq!(boot.patch_server_ip, "patch.example.net");
        assert_eq!(boot.patch_server_port, 8000);
        assert_eq!(boot.data_center_id, 150);
        assert!(!boot.akamai_dlm);
        assert!(boot.track_disk_usage);
        assert_eq!(
            boot.pass_url,
            "https://account.example.net/SendPassword.aspx?Username="
        );
    }

    #[test]
    fn test_boot_round_trip() {
        let boot: BootConfig = ldf::from_bytes(STOCK_BOOT.as_bytes()).unwrap();
        let again: BootConfig = ldf::from_bytes(&ldf::marshal(&boot).unwrap()).unwrap();
        assert_eq!(boot, again);
    }

    #[test]
    fn test_field_table_keys_are_unique() {
        let mut keys: Vec<_> = BootConfig::fields().iter().map(|f| f.key).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), BootConfig::fields().len());
    }
}
