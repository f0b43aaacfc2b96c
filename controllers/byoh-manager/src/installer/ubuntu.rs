//! Ubuntu installer: pulls the bundle with imgpkg and installs the debs it
//! carries (kubeadm, kubelet, kubectl, cri-tools, containerd).

use super::{BUNDLE_DOWNLOAD_PATH, Bundle, InstallerStrategy};

const IMGPKG_VERSION: &str = "v0.36.0";

/// Ubuntu releases with published bundles.
const SUPPORTED_RELEASES: &[&str] = &["20.04", "22.04"];

#[derive(Debug, Clone)]
pub struct UbuntuInstaller {
    release: &'static str,
    bundle_addr: String,
}

impl UbuntuInstaller {
    /// Release of a supported `Ubuntu <release>...` OS image on amd64.
    pub fn detect(os_image: &str, architecture: &str) -> Option<&'static str> {
        if architecture != "amd64" {
            return None;
        }
        let version = os_image.strip_prefix("Ubuntu ")?;
        SUPPORTED_RELEASES.iter().copied().find(|release| {
            version
                .strip_prefix(release)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.') || rest.starts_with(' '))
        })
    }

    pub fn new(release: &'static str, k8s_version: &str, bundle: Bundle) -> Self {
        let bundle_addr = bundle.address(&format!("ubuntu_{}_x86-64", release), k8s_version);
        Self { release, bundle_addr }
    }

    fn preamble(&self) -> String {
        format!(
            "set -euox pipefail\n\n\
             BUNDLE_DOWNLOAD_PATH={path}\n\
             BUNDLE_ADDR={addr}\n\
             IMGPKG_VERSION={imgpkg}\n\
             ARCH=amd64\n\
             BUNDLE_PATH=$BUNDLE_DOWNLOAD_PATH/$BUNDLE_ADDR\n",
            path = BUNDLE_DOWNLOAD_PATH,
            addr = self.bundle_addr,
            imgpkg = IMGPKG_VERSION,
        )
    }
}

impl InstallerStrategy for UbuntuInstaller {
    fn install(&self) -> String {
        format!(
            r##"{preamble}
# ubuntu {release}
if ! command -v imgpkg >>/dev/null; then
	echo "installing imgpkg"
	wget -nv -O- github.com/vmware-tanzu/carvel-imgpkg/releases/download/$IMGPKG_VERSION/imgpkg-linux-$ARCH > /tmp/imgpkg
	mv /tmp/imgpkg /usr/local/bin/imgpkg
	chmod +x /usr/local/bin/imgpkg
fi

echo "downloading bundle"
mkdir -p $BUNDLE_PATH
imgpkg pull -i $BUNDLE_ADDR -o $BUNDLE_PATH

## disable swap
swapoff -a && sed -ri '/\sswap\s/s/^#?/#/' /etc/fstab

## disable firewall
if command -v ufw >>/dev/null; then
	ufw disable
fi

## load kernel modules
modprobe overlay && modprobe br_netfilter

## adding os configuration
tar -C / -xvf "$BUNDLE_PATH/conf.tar" && sysctl --system

## installing deb packages
for pkg in cri-tools kubernetes-cni kubectl kubelet kubeadm; do
	dpkg --install "$BUNDLE_PATH/$pkg.deb" && apt-mark hold $pkg
done

## intalling containerd
tar -C / -xvf "$BUNDLE_PATH/containerd.tar"

## starting containerd service
systemctl daemon-reload && systemctl enable containerd && systemctl start containerd
"##,
            preamble = self.preamble(),
            release = self.release,
        )
    }

    fn uninstall(&self) -> String {
        format!(
            r##"{preamble}
# ubuntu {release}
## disabling containerd service
systemctl stop containerd && systemctl disable containerd && systemctl daemon-reload

## removing containerd configurations and cni plugins
rm -rf /opt/cni/ && rm -rf /opt/containerd/ && tar tf "$BUNDLE_PATH/containerd.tar" | xargs -n 1 echo '/' | sed 's/ //g' | grep -e '[^/]$' | xargs rm -f

## removing deb packages
for pkg in kubeadm kubelet kubectl kubernetes-cni cri-tools; do
	apt-mark unhold $pkg && apt-get remove -y $pkg
done

## removing os configuration
tar tf "$BUNDLE_PATH/conf.tar" | xargs -n 1 echo '/' | sed 's/ //g' | grep -e "[^/]$" | xargs rm -f

## remove kernel modules
modprobe -rq overlay && modprobe -r br_netfilter

## enable firewall
if command -v ufw >>/dev/null; then
	ufw enable
fi

## enable swap
swapon -a && sed -ri '/\sswap\s/s/^#//' /etc/fstab

rm -rf $BUNDLE_PATH
"##,
            preamble = self.preamble(),
            release = self.release,
        )
    }
}
