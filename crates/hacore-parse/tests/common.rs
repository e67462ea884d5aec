//! Fixture outputs from a two-node web cluster.

#![allow(dead_code)]

pub const CRM_MON: &str = r#"<?xml version="1.0"?>
<crm_mon version="2.0.5">
  <summary><current_dc present="true" name="alpha"/></summary>
  <nodes>
    <node name="alpha" id="1" online="true" standby="false" maintenance="false" unclean="false" is_dc="true"/>
    <node name="beta" id="2" online="true" standby="false" maintenance="false" unclean="false" is_dc="false"/>
  </nodes>
  <resources>
    <clone id="ms_drbd_web" multi_state="true">
      <resource id="drbd_web:0" role="Master" active="true" managed="true" failed="false"><node name="alpha"/></resource>
      <resource id="drbd_web:1" role="Slave" active="true" managed="true" failed="false"><node name="beta"/></resource>
    </clone>
    <group id="g_web">
      <resource id="fs_web" role="Started" active="true" managed="true" failed="false"><node name="alpha"/></resource>
      <resource id="vip" role="Started" active="true" managed="true" failed="false"><node name="alpha"/></resource>
    </group>
  </resources>
</crm_mon>"#;

pub const CIB: &str = r#"<cib admin_epoch="0" epoch="17" num_updates="4">
  <configuration>
    <nodes><node id="1" uname="alpha"/><node id="2" uname="beta"/></nodes>
    <resources>
      <master id="ms_drbd_web">
        <primitive id="drbd_web" class="ocf" provider="linbit" type="drbd">
          <instance_attributes id="drbd_web-ia"><nvpair id="drbd_web-ia-r" name="drbd_resource" value="web"/></instance_attributes>
        </primitive>
      </master>
      <group id="g_web">
        <primitive id="fs_web" class="ocf" provider="heartbeat" type="Filesystem"/>
        <primitive id="vip" class="ocf" provider="heartbeat" type="IPaddr2"/>
      </group>
    </resources>
    <constraints>
      <rsc_colocation id="web_on_drbd" rsc="g_web" with-rsc="ms_drbd_web" with-rsc-role="Master" score="INFINITY"/>
      <rsc_order id="drbd_before_web" first="ms_drbd_web" first-action="promote" then="g_web" then-action="start" kind="Mandatory"/>
      <rsc_location id="prefer_alpha" rsc="g_web" node="alpha" score="50"/>
    </constraints>
  </configuration>
</cib>"#;

pub const DRBD_STATUS_ALPHA: &str = "\
web node-id:0 role:Primary suspended:no
  volume:0 minor:0 disk:UpToDate
  beta node-id:1 connection:Connected role:Secondary
    volume:0 replication:Established peer-disk:UpToDate
";

pub const DRBD_DUMP: &str = "\
resource web {
    on alpha {
        node-id 0;
        volume 0 { device minor 0; disk /dev/vg0/web; meta-disk internal; }
        address ipv4 10.0.0.1:7789;
    }
    on beta {
        node-id 1;
        volume 0 { device minor 0; disk /dev/vg0/web; meta-disk internal; }
        address ipv4 10.0.0.2:7789;
    }
}
";

pub const IP_ADDR: &str = "2: eth0    inet 10.0.0.1/24 brd 10.0.0.255 scope global eth0\n";

pub const LSBLK: &str = "NAME=\"vda\" SIZE=\"10737418240\" TYPE=\"disk\" MOUNTPOINT=\"\"\n";
